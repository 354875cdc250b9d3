//! Formats for the planner's stderr event stream.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How `kiln-plan` renders tracing events.
///
/// Accepted spellings are case-insensitive: `json`, `compact`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event, for CI log collectors.
    Json,
    /// Single-line text for terminals.
    #[default]
    Compact,
}

/// Error returned when a log format name is not recognised.
pub type LogFormatParseError = strum::ParseError;
