//! Append-only, multiply-indexed store of run lifecycle events.
//!
//! Events are kept in memory with three inverted indexes (run id, correlation
//! id, event type). Appends and the retention sweep are the only writers and
//! each runs under a single write lock, so the indexes never disagree with the
//! primary map.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conductor_types::error::{ErrorCode, OrchestratorError};
use conductor_types::event::{RunEvent, RunEventType};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bus::EventBus;

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Inclusive time window applied to index listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl EventFilter {
    fn matches(&self, event: &RunEvent) -> bool {
        self.start_time.is_none_or(|start| event.timestamp >= start)
            && self.end_time.is_none_or(|end| event.timestamp <= end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Timestamp,
    Type,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Composite query: every set field must match. Sorting and pagination are
/// applied after filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<RunEventType>,
    #[serde(default, flatten)]
    pub window: EventFilter,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One page of query results. `total` counts every match before pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<RunEvent>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStoreStats {
    pub total_events: usize,
    pub runs: usize,
    pub correlations: usize,
    pub by_type: BTreeMap<RunEventType, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<String, RunEvent>,
    /// Insertion order; breaks timestamp ties deterministically.
    order: Vec<String>,
    by_run: HashMap<String, Vec<String>>,
    by_correlation: HashMap<String, Vec<String>>,
    by_type: HashMap<RunEventType, Vec<String>>,
}

impl Inner {
    fn collect<'a>(&'a self, ids: Option<&'a Vec<String>>) -> Vec<&'a RunEvent> {
        ids.map(|ids| ids.iter().filter_map(|id| self.events.get(id)).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct RunEventStore {
    inner: RwLock<Inner>,
    bus: Option<EventBus>,
}

impl RunEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also publishes every accepted event on `bus`.
    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            inner: RwLock::default(),
            bus: Some(bus),
        }
    }

    pub fn bus(&self) -> Option<&EventBus> {
        self.bus.as_ref()
    }

    /// Append an event. Rejects an id that is already stored.
    pub fn append_event(&self, event: RunEvent) -> Result<(), OrchestratorError> {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if inner.events.contains_key(&event.id) {
                return Err(OrchestratorError::new(
                    ErrorCode::ObservabilityDuplicateEvent,
                    format!("event '{}' already exists", event.id),
                )
                .with_resource_id(event.id.clone())
                .with_run_id(event.run_id.clone()));
            }

            let id = event.id.clone();
            inner
                .by_run
                .entry(event.run_id.clone())
                .or_default()
                .push(id.clone());
            inner
                .by_correlation
                .entry(event.correlation_id.clone())
                .or_default()
                .push(id.clone());
            inner
                .by_type
                .entry(event.event_type)
                .or_default()
                .push(id.clone());
            inner.order.push(id.clone());
            inner.events.insert(id, event.clone());
        }

        tracing::trace!(
            event_id = %event.id,
            run_id = %event.run_id,
            event_type = %event.event_type,
            "event appended"
        );

        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
        Ok(())
    }

    pub fn get_event(&self, id: &str) -> Option<RunEvent> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.events.get(id).cloned()
    }

    /// Events for a run, ascending by timestamp.
    pub fn get_events_by_run_id(&self, run_id: &str, filter: Option<&EventFilter>) -> Vec<RunEvent> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        listing(inner.collect(inner.by_run.get(run_id)), filter)
    }

    /// Events sharing a correlation id, ascending by timestamp.
    pub fn get_events_by_correlation_id(
        &self,
        correlation_id: &str,
        filter: Option<&EventFilter>,
    ) -> Vec<RunEvent> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        listing(inner.collect(inner.by_correlation.get(correlation_id)), filter)
    }

    /// Events of one type, ascending by timestamp.
    pub fn get_events_by_type(
        &self,
        event_type: RunEventType,
        filter: Option<&EventFilter>,
    ) -> Vec<RunEvent> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        listing(inner.collect(inner.by_type.get(&event_type)), filter)
    }

    pub fn query_events(&self, query: &EventQuery) -> EventPage {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        // Start from the narrowest index the query names.
        let candidates: Vec<&RunEvent> = if let Some(run_id) = &query.run_id {
            inner.collect(inner.by_run.get(run_id))
        } else if let Some(correlation_id) = &query.correlation_id {
            inner.collect(inner.by_correlation.get(correlation_id))
        } else if query.event_types.len() == 1 {
            inner.collect(inner.by_type.get(&query.event_types[0]))
        } else {
            inner.collect(Some(&inner.order))
        };

        let mut matched: Vec<&RunEvent> = candidates
            .into_iter()
            .filter(|e| query.run_id.as_ref().is_none_or(|r| &e.run_id == r))
            .filter(|e| {
                query
                    .correlation_id
                    .as_ref()
                    .is_none_or(|c| &e.correlation_id == c)
            })
            .filter(|e| query.event_types.is_empty() || query.event_types.contains(&e.event_type))
            .filter(|e| query.window.matches(e))
            .collect();

        match query.sort_by {
            SortField::Timestamp => matched.sort_by_key(|e| e.timestamp),
            SortField::Type => matched.sort_by(|a, b| {
                a.event_type
                    .as_str()
                    .cmp(b.event_type.as_str())
                    .then(a.timestamp.cmp(&b.timestamp))
            }),
        }
        if query.order == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len();
        let events = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        EventPage { events, total }
    }

    /// Retention sweep: drop every event with a timestamp strictly before
    /// `cutoff`. Returns how many were removed.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Inner {
            events,
            order,
            by_run,
            by_correlation,
            by_type,
        } = &mut *inner;

        let before = events.len();
        events.retain(|_, e| e.timestamp >= cutoff);
        let removed = before - events.len();
        if removed == 0 {
            return 0;
        }

        order.retain(|id| events.contains_key(id));
        prune_index(by_run, events);
        prune_index(by_correlation, events);
        prune_index(by_type, events);

        tracing::info!(removed, cutoff = %cutoff, "purged expired run events");
        removed
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EventStoreStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        EventStoreStats {
            total_events: inner.events.len(),
            runs: inner.by_run.len(),
            correlations: inner.by_correlation.len(),
            by_type: inner
                .by_type
                .iter()
                .map(|(t, ids)| (*t, ids.len()))
                .collect(),
            oldest: inner.events.values().map(|e| e.timestamp).min(),
            newest: inner.events.values().map(|e| e.timestamp).max(),
        }
    }
}

fn listing(mut events: Vec<&RunEvent>, filter: Option<&EventFilter>) -> Vec<RunEvent> {
    if let Some(filter) = filter {
        events.retain(|e| filter.matches(e));
    }
    events.sort_by_key(|e| e.timestamp);
    events.into_iter().cloned().collect()
}

fn prune_index<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, Vec<String>>,
    events: &HashMap<String, RunEvent>,
) {
    index.retain(|_, ids| {
        ids.retain(|id| events.contains_key(id));
        !ids.is_empty()
    });
}

/// Purge events older than `max_age` every `interval` until `cancel` fires.
pub fn spawn_retention_sweeper(
    store: Arc<RunEventStore>,
    max_age: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("event retention sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let Ok(age) = chrono::Duration::from_std(max_age) else {
                        tracing::warn!("retention age out of range, sweeper disabled");
                        break;
                    };
                    if let Some(cutoff) = Utc::now().checked_sub_signed(age) {
                        store.purge_older_than(cutoff);
                    }
                }
            }
        }
    })
}
