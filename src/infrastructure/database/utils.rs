//! Row-mapping helpers shared by the SQLite stores.

use chrono::{DateTime, TimeZone, Utc};

/// Epoch milliseconds for a timestamp.
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn opt_to_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_millis)
}

/// Timestamp from epoch milliseconds; out-of-range values clamp to now.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub fn opt_from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_millis)
}

/// JSON-encode a string list for a TEXT column.
pub fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".into())
}

/// Decode a JSON string list column.
pub fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// SQL LIKE pattern matching one element of a JSON string array.
///
/// LIKE metacharacters in the label (`%`, `_`, `\`) are escaped so that
/// underscore-heavy labels like `workflow_phase:build` match literally;
/// queries using this pattern must carry `ESCAPE '\'`.
pub fn label_pattern(label: &str) -> String {
    let mut escaped = String::with_capacity(label.len());
    for ch in label.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!("%\"{escaped}\"%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        let restored = from_millis(to_millis(now));
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn list_round_trip() {
        let list = vec!["a".to_string(), "workflow:auto".to_string()];
        assert_eq!(decode_list(&encode_list(&list)), list);
        assert!(decode_list("garbage").is_empty());
    }

    #[test]
    fn label_pattern_quotes_element() {
        assert_eq!(label_pattern("defect"), "%\"defect\"%");
    }

    #[test]
    fn label_pattern_escapes_like_metacharacters() {
        assert_eq!(
            label_pattern("workflow_phase:build"),
            "%\"workflow\\_phase:build\"%"
        );
        assert_eq!(label_pattern("50%_done"), "%\"50\\%\\_done\"%");
        assert_eq!(label_pattern("a\\b"), "%\"a\\\\b\"%");
    }
}
