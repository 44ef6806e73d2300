use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width UTC form used for every stored timestamp. Lexical order of the
/// strings equals chronological order, so range filters work on TEXT columns.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|parsed| parsed.with_timezone(&Utc))
}
