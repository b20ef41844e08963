//! GET /api/v1/events - Composite event query over the run event store.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use conductor_core::event::{EventFilter, EventQuery, SortField, SortOrder};
use conductor_types::event::RunEventType;
use serde::Deserialize;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestClock};
use crate::http::views::EventPageView;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// `type` takes a comma-separated list (`step.failed,run.failed`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub run_id: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EventsQuery {
    fn into_store_query(self) -> Result<EventQuery, AppError> {
        let event_types = match self.event_type.as_deref() {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<RunEventType>().map_err(AppError::invalid_input))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::invalid_input("'from' must not be after 'to'"));
            }
        }

        Ok(EventQuery {
            run_id: self.run_id,
            correlation_id: self.correlation_id,
            event_types,
            window: EventFilter {
                start_time: self.from,
                end_time: self.to,
            },
            sort_by: self.sort_by,
            order: self.order,
            offset: self.offset,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)),
        })
    }
}

pub async fn query_events(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<EventPageView>>, AppError> {
    let clock = RequestClock::start();
    let Query(query) = query?;

    let page = state.events.query_events(&query.into_store_query()?);
    Ok(clock.respond(EventPageView::from(page)))
}
