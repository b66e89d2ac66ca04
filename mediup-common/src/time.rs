//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp for use inside a file name
///
/// RFC 3339 with millisecond precision, with `:` and `.` replaced by `-`
/// (e.g. `2024-05-01T10-20-30-123Z`).
pub fn file_name_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}
