//! The two dedicated quoters that are the only path allowed to construct
//! column-value literals (§4.3 "Range by probe", §9 "SQL literal safety").
//!
//! The columnar dialect's bind-parameter handling is uneven, so every
//! literal in a read-path query is rendered inline through one of these
//! functions rather than through driver-level parameter binding.

use chrono::{DateTime, Utc};

/// Quotes a string literal by doubling embedded single quotes and wrapping
/// the result in single quotes.
#[must_use]
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders a UTC timestamp as `'YYYY-MM-DD HH:MM:SS'`, the literal format
/// the columnar dialect's `DateTime('UTC')` columns expect.
#[must_use]
pub fn quote_timestamp(value: DateTime<Utc>) -> String {
    format!("'{}'", value.format("%Y-%m-%d %H:%M:%S"))
}

/// Renders an integer literal by direct formatting (no quoting needed).
#[must_use]
pub fn quote_int(value: i64) -> String {
    value.to_string()
}

/// Renders a boolean literal as ClickHouse's `0`/`1`.
#[must_use]
pub fn quote_bool(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}

/// Renders a `LIKE 'prefix%'` predicate fragment for a prefix match on
/// `column`, with the prefix itself single-quote-escaped (§4.3 "Flexible
/// finder").
#[must_use]
pub fn like_prefix(column: &str, prefix: &str) -> String {
    let escaped = prefix.replace('\'', "''").replace('%', "\\%").replace('_', "\\_");
    format!("{column} LIKE '{escaped}%'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quote_string_doubles_embedded_single_quotes() {
        assert_eq!(quote_string("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn quote_timestamp_renders_utc_format() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(quote_timestamp(ts), "'2026-01-02 03:04:05'");
    }

    #[test]
    fn like_prefix_escapes_wildcards_in_the_prefix() {
        assert_eq!(
            like_prefix("target", "100%_test"),
            "target LIKE '100\\%\\_test%'"
        );
    }
}
