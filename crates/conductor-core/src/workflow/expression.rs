//! Condition expressions for conditional steps.
//!
//! The grammar is intentionally tiny:
//!
//! ```text
//! condition := operand ( op operand )?
//! op        := "==" | "!=" | ">" | "<" | ">=" | "<="   ("===" / "!==" accepted)
//! operand   := string | number | true | false | null | undefined | path
//! ```
//!
//! A lone operand is a truthiness check. Strings are quoted with `'` or `"`
//! and may contain operator characters. Paths resolve through
//! [`resolve_path`](super::context::resolve_path).

use std::cmp::Ordering;

use conductor_types::context::ExecutionContext;
use serde_json::Value;

use super::context::resolve_path;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal starting at {0}")]
    UnterminatedString(usize),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("expected a single comparison or operand, found {0} tokens")]
    Malformed(usize),

    #[error("expected an operand, found operator '{0}'")]
    MisplacedOperator(String),
}

// ---------------------------------------------------------------------------
// Tokens and AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Word(String),
    Op(CompareOp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Undefined,
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Truthy(Operand),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '-' | '[' | ']')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i;
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => {
                        text.push(chars[i + 1]);
                        i += 2;
                    }
                    q if q == c => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    other => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(ExpressionError::UnterminatedString(start));
            }
            tokens.push(Token::Str(text));
            continue;
        }

        let negative_number =
            c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() || negative_number {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E')) {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let n = literal
                .parse::<f64>()
                .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Num(n));
            continue;
        }

        if is_word_start(c) {
            let start = i;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let after = chars.get(i + 2).copied();
        let (op, width) = match (c, next, after) {
            ('=', Some('='), Some('=')) => (CompareOp::Eq, 3),
            ('!', Some('='), Some('=')) => (CompareOp::Ne, 3),
            ('=', Some('='), _) => (CompareOp::Eq, 2),
            ('!', Some('='), _) => (CompareOp::Ne, 2),
            ('>', Some('='), _) => (CompareOp::Ge, 2),
            ('<', Some('='), _) => (CompareOp::Le, 2),
            ('>', _, _) => (CompareOp::Gt, 1),
            ('<', _, _) => (CompareOp::Lt, 1),
            _ => return Err(ExpressionError::UnexpectedChar { ch: c, pos: i }),
        };
        tokens.push(Token::Op(op));
        i += width;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn operand(token: Token) -> Result<Operand, ExpressionError> {
    Ok(match token {
        Token::Str(s) => Operand::Literal(Value::String(s)),
        Token::Num(n) => Operand::Literal(
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ),
        Token::Word(w) => match w.as_str() {
            "true" => Operand::Literal(Value::Bool(true)),
            "false" => Operand::Literal(Value::Bool(false)),
            "null" => Operand::Literal(Value::Null),
            "undefined" => Operand::Undefined,
            _ => Operand::Path(w),
        },
        Token::Op(op) => return Err(ExpressionError::MisplacedOperator(op.symbol().to_string())),
    })
}

/// Parse a condition without evaluating it.
pub fn parse_condition(expr: &str) -> Result<Condition, ExpressionError> {
    let mut tokens = tokenize(expr)?;
    match tokens.len() {
        0 => Err(ExpressionError::Empty),
        1 => Ok(Condition::Truthy(operand(tokens.remove(0))?)),
        3 => {
            let right = tokens.pop().ok_or(ExpressionError::Empty)?;
            let op = tokens.pop().ok_or(ExpressionError::Empty)?;
            let left = tokens.pop().ok_or(ExpressionError::Empty)?;
            let Token::Op(op) = op else {
                return Err(ExpressionError::Malformed(3));
            };
            Ok(Condition::Compare {
                left: operand(left)?,
                op,
                right: operand(right)?,
            })
        }
        n => Err(ExpressionError::Malformed(n)),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Operand {
    fn resolve(&self, ctx: &ExecutionContext) -> Option<Value> {
        match self {
            Operand::Literal(v) => Some(v.clone()),
            Operand::Undefined => None,
            Operand::Path(p) => resolve_path(p, ctx),
        }
    }
}

impl Condition {
    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Condition::Truthy(operand) => operand.resolve(ctx).as_ref().is_some_and(value_to_bool),
            Condition::Compare { left, op, right } => {
                let l = left.resolve(ctx);
                let r = right.resolve(ctx);
                match op {
                    CompareOp::Eq => loose_eq(l.as_ref(), r.as_ref()),
                    CompareOp::Ne => !loose_eq(l.as_ref(), r.as_ref()),
                    CompareOp::Gt => compare(l.as_ref(), r.as_ref()) == Some(Ordering::Greater),
                    CompareOp::Lt => compare(l.as_ref(), r.as_ref()) == Some(Ordering::Less),
                    CompareOp::Ge => matches!(
                        compare(l.as_ref(), r.as_ref()),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    CompareOp::Le => matches!(
                        compare(l.as_ref(), r.as_ref()),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                }
            }
        }
    }
}

/// Evaluate a condition against the context.
///
/// Malformed expressions are logged and evaluate to `false`.
pub fn evaluate_condition(expr: &str, ctx: &ExecutionContext) -> bool {
    match parse_condition(expr) {
        Ok(condition) => condition.evaluate(ctx),
        Err(e) => {
            tracing::warn!(
                expression = expr,
                error = %e,
                run_id = ctx.run_id.as_str(),
                "malformed condition, evaluating to false"
            );
            false
        }
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric coercion; `None` stands for NaN.
fn to_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn loose_eq(left: Option<&Value>, right: Option<&Value>) -> bool {
    let nullish = |v: Option<&Value>| matches!(v, None | Some(Value::Null));
    if nullish(left) || nullish(right) {
        return nullish(left) && nullish(right);
    }
    match (left, right) {
        (Some(Value::String(a)), Some(Value::String(b))) => a == b,
        (Some(a @ (Value::Array(_) | Value::Object(_))), Some(b)) => a == b,
        (Some(a), Some(b @ (Value::Array(_) | Value::Object(_)))) => a == b,
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare(left: Option<&Value>, right: Option<&Value>) -> Option<Ordering> {
    if let (Some(Value::String(a)), Some(Value::String(b))) = (left, right) {
        return Some(a.cmp(b));
    }
    to_number(left)?.partial_cmp(&to_number(right)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
