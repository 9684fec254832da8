//! Pagination state machine.
//!
//! Four strategies are supported. Each poll runs the same three steps:
//!
//! ```text
//!   persisted state ──build_query──▶ request parameters
//!                                          │
//!                                     HTTP response
//!                                          │
//!   previous state ──extract_signal──▶ PaginationSignal
//!                                          │
//!                        advance_state ──▶ StateUpdate ──▶ persisted state
//! ```
//!
//! The persisted state is the only thing that lets a poll sequence resume
//! after a crash, so `advance_state` never moves it backwards:
//!
//! - offset and page values only increase while more data exists
//! - a time window only advances to a timestamp `>=` the previous one
//! - an empty, exhausted response leaves the state untouched
//!
//! Once a cursor, offset or page sequence is exhausted the state is cleared
//! so the next poll re-syncs the catalog from the beginning. Time-window
//! sync is a continuous stream and keeps its checkpoint instead.

use crate::extract::{extract_token, is_truthy, max_timestamp, record_count};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;


/// Default page size for offset pagination.
pub const DEFAULT_LIMIT: u64 = 100;

/// Response fields that signal another page for page-number pagination.
const NEXT_PAGE_FIELDS: [&str; 3] = ["hasNextPage", "has_next_page", "nextPage"];

/// Response fields that signal more data for time-window pagination.
const HAS_MORE_FIELDS: [&str; 2] = ["hasMore", "has_more"];

/// Pagination strategy discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    Cursor,
    Offset,
    Page,
    TimeWindow,
}

impl PaginationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaginationKind::Cursor => "cursor",
            PaginationKind::Offset => "offset",
            PaginationKind::Page => "page",
            PaginationKind::TimeWindow => "time_window",
        }
    }
}

/// Endpoint pagination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PaginationConfig {
    /// Opaque continuation token read from the response.
    Cursor {
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        /// Path of the next cursor in the response body
        #[serde(default = "default_cursor_path")]
        cursor_path: String,
    },
    /// Numeric record offset with a fixed page size.
    Offset {
        #[serde(default = "default_offset_param")]
        offset_param: String,
        #[serde(default = "default_limit_param")]
        limit_param: String,
        #[serde(default = "default_limit")]
        limit: u64,
    },
    /// 1-based page number.
    Page {
        #[serde(default = "default_page_param")]
        page_param: String,
        #[serde(default)]
        page_size_param: Option<String>,
        #[serde(default)]
        page_size: Option<u64>,
    },
    /// Modification-time checkpoint sent as a `since`-style filter.
    TimeWindow {
        #[serde(default = "default_timestamp_param")]
        timestamp_param: String,
        /// Explicit next-timestamp location in the response body
        #[serde(default)]
        timestamp_path: Option<String>,
        /// Record field scanned when the response carries no explicit timestamp
        #[serde(default = "default_timestamp_field")]
        timestamp_field: String,
    },
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

fn default_cursor_path() -> String {
    "nextCursor".to_string()
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_timestamp_param() -> String {
    "since".to_string()
}

fn default_timestamp_field() -> String {
    "updatedAt".to_string()
}

impl PaginationConfig {
    pub fn kind(&self) -> PaginationKind {
        match self {
            PaginationConfig::Cursor { .. } => PaginationKind::Cursor,
            PaginationConfig::Offset { .. } => PaginationKind::Offset,
            PaginationConfig::Page { .. } => PaginationKind::Page,
            PaginationConfig::TimeWindow { .. } => PaginationKind::TimeWindow,
        }
    }
}

/// Persisted continuation marker for one endpoint.
///
/// Serialized as `{"type": "...", <field>: ...}` in the endpoint's cursor column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaginationState {
    Cursor {
        cursor: String,
    },
    Offset {
        #[serde(default)]
        offset: u64,
    },
    Page {
        #[serde(default = "first_page")]
        page: u64,
    },
    TimeWindow {
        #[serde(rename = "timeWindow")]
        time_window: String,
    },
}

fn first_page() -> u64 {
    1
}

impl PaginationState {
    pub fn kind(&self) -> PaginationKind {
        match self {
            PaginationState::Cursor { .. } => PaginationKind::Cursor,
            PaginationState::Offset { .. } => PaginationKind::Offset,
            PaginationState::Page { .. } => PaginationKind::Page,
            PaginationState::TimeWindow { .. } => PaginationKind::TimeWindow,
        }
    }
}

/// Continuation signal extracted from one response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSignal {
    pub has_more: bool,
    /// Records in the extracted data payload
    pub record_count: usize,
    /// Strategy-specific next value, if one could be determined
    pub next: Option<PaginationState>,
}

/// What to do with the persisted state after a successful poll.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Leave the stored state exactly as it is.
    Unchanged,
    /// Erase the stored state; the next poll starts from the beginning.
    Clear,
    /// Replace the stored state.
    Set(PaginationState),
}

/// Reads a stored cursor column.
///
/// Typed JSON records are decoded directly. Anything that is not a typed
/// record is a legacy bare cursor value and is upgraded to
/// `PaginationState::Cursor`. Empty input means "no state".
pub fn parse_state(raw: Option<&str>) -> Option<PaginationState> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(state) = serde_json::from_str::<PaginationState>(raw) {
        return Some(state);
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(cursor)) if !cursor.is_empty() => Some(PaginationState::Cursor { cursor }),
        Ok(Value::Object(_)) | Ok(Value::Array(_)) => {
            warn!(state = %raw, "Unrecognized pagination state record, ignoring");
            None
        }
        Ok(Value::Null) => None,
        _ => Some(PaginationState::Cursor {
            cursor: raw.to_string(),
        }),
    }
}

/// Encodes a state for the endpoint's cursor column.
pub fn serialize_state(state: &PaginationState) -> serde_json::Result<String> {
    serde_json::to_string(state)
}

/// Returns `state` only if it belongs to the configured strategy.
fn state_for<'a>(config: &PaginationConfig, state: Option<&'a PaginationState>) -> Option<&'a PaginationState> {
    let state = state?;
    if state.kind() == config.kind() {
        Some(state)
    } else {
        warn!(
            configured = config.kind().as_str(),
            stored = state.kind().as_str(),
            "Stored pagination state does not match configured strategy, starting fresh"
        );
        None
    }
}

fn current_offset(state: Option<&PaginationState>) -> u64 {
    match state {
        Some(PaginationState::Offset { offset }) => *offset,
        _ => 0,
    }
}

fn current_page(state: Option<&PaginationState>) -> u64 {
    match state {
        Some(PaginationState::Page { page }) => (*page).max(1),
        _ => 1,
    }
}

fn current_time_window(state: Option<&PaginationState>) -> Option<&str> {
    match state {
        Some(PaginationState::TimeWindow { time_window }) => Some(time_window.as_str()),
        _ => None,
    }
}

/// The later of two optional ISO-8601 timestamps.
fn later_timestamp(a: Option<String>, b: Option<&str>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) if b > a.as_str() => Some(b.to_string()),
        (Some(a), _) => Some(a),
        (None, b) => b.map(str::to_string),
    }
}

/// Query parameters for the next request given the current state.
pub fn build_query(config: &PaginationConfig, state: Option<&PaginationState>) -> Vec<(String, String)> {
    let state = state_for(config, state);
    let mut params = Vec::new();

    match config {
        PaginationConfig::Cursor { cursor_param, .. } => {
            if let Some(PaginationState::Cursor { cursor }) = state {
                params.push((cursor_param.clone(), cursor.clone()));
            }
        }
        PaginationConfig::Offset {
            offset_param,
            limit_param,
            limit,
        } => {
            params.push((offset_param.clone(), current_offset(state).to_string()));
            params.push((limit_param.clone(), limit.to_string()));
        }
        PaginationConfig::Page {
            page_param,
            page_size_param,
            page_size,
        } => {
            params.push((page_param.clone(), current_page(state).to_string()));
            if let (Some(param), Some(size)) = (page_size_param, page_size) {
                params.push((param.clone(), size.to_string()));
            }
        }
        PaginationConfig::TimeWindow { timestamp_param, .. } => {
            if let Some(since) = current_time_window(state) {
                params.push((timestamp_param.clone(), since.to_string()));
            }
        }
    }

    params
}

/// Reads the continuation signal from a response.
///
/// `response` is the full decoded body, `data` the payload extracted at the
/// endpoint's data path. Malformed or missing pagination fields degrade to
/// `has_more = false` rather than failing.
pub fn extract_signal(
    config: &PaginationConfig,
    response: &Value,
    data: Option<&Value>,
    previous: Option<&PaginationState>,
) -> PaginationSignal {
    let previous = state_for(config, previous);
    let count = record_count(data);

    match config {
        PaginationConfig::Cursor { cursor_path, .. } => {
            let next = extract_token(response, cursor_path);
            PaginationSignal {
                has_more: next.is_some(),
                record_count: count,
                next: next.map(|cursor| PaginationState::Cursor { cursor }),
            }
        }
        PaginationConfig::Offset { limit, .. } => {
            // A full page implies more may exist
            let has_more = *limit > 0 && count as u64 >= *limit;
            PaginationSignal {
                has_more,
                record_count: count,
                next: has_more.then(|| PaginationState::Offset {
                    offset: current_offset(previous).saturating_add(*limit),
                }),
            }
        }
        PaginationConfig::Page { .. } => {
            let has_more = NEXT_PAGE_FIELDS.iter().any(|field| is_truthy(response, field));
            PaginationSignal {
                has_more,
                record_count: count,
                next: has_more.then(|| PaginationState::Page {
                    page: current_page(previous).saturating_add(1),
                }),
            }
        }
        PaginationConfig::TimeWindow {
            timestamp_path,
            timestamp_field,
            ..
        } => {
            let discovered = timestamp_path
                .as_deref()
                .and_then(|path| extract_token(response, path))
                .or_else(|| data.and_then(|records| max_timestamp(records, timestamp_field)));
            let next = later_timestamp(discovered, current_time_window(previous));
            PaginationSignal {
                has_more: HAS_MORE_FIELDS.iter().any(|field| is_truthy(response, field)),
                record_count: count,
                next: next.map(|time_window| PaginationState::TimeWindow { time_window }),
            }
        }
    }
}

/// Computes the state to persist after a successful poll.
pub fn advance_state(
    config: &PaginationConfig,
    signal: &PaginationSignal,
    previous: Option<&PaginationState>,
) -> StateUpdate {
    let previous = state_for(config, previous);

    if !signal.has_more && signal.record_count == 0 {
        // Quiet interval: never erase or regress a valid checkpoint
        return StateUpdate::Unchanged;
    }

    let next = match config {
        PaginationConfig::TimeWindow { .. } => {
            let discovered = match &signal.next {
                Some(PaginationState::TimeWindow { time_window }) => Some(time_window.clone()),
                _ => None,
            };
            later_timestamp(discovered, current_time_window(previous))
                .map(|time_window| PaginationState::TimeWindow { time_window })
        }
        _ if !signal.has_more => return StateUpdate::Clear,
        PaginationConfig::Offset { limit, .. } => Some(match &signal.next {
            Some(next @ PaginationState::Offset { .. }) => next.clone(),
            _ => PaginationState::Offset {
                offset: current_offset(previous).saturating_add(*limit),
            },
        }),
        PaginationConfig::Page { .. } => Some(match &signal.next {
            Some(next @ PaginationState::Page { .. }) => next.clone(),
            _ => PaginationState::Page {
                page: current_page(previous).saturating_add(1),
            },
        }),
        PaginationConfig::Cursor { .. } => match &signal.next {
            Some(next @ PaginationState::Cursor { .. }) => Some(next.clone()),
            _ => None,
        },
    };

    match next {
        Some(state) if Some(&state) == previous => StateUpdate::Unchanged,
        Some(state) => StateUpdate::Set(state),
        None => StateUpdate::Unchanged,
    }
}
