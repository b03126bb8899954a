//! Lenient date input
//!
//! Clients send dates as RFC 3339 strings, bare `YYYY-MM-DD` dates,
//! epoch milliseconds, or `{"$date": <string|number>}`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_text(text),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::Object(map) => match map.get("$date")? {
            inner @ (Value::String(_) | Value::Number(_)) => parse_date(inner),
            _ => None,
        },
        _ => None,
    }
}

fn parse_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_every_supported_shape() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let millis = expected.timestamp_millis();

        assert_eq!(parse_date(&json!("2025-03-01T12:00:00Z")), Some(expected));
        assert_eq!(parse_date(&json!("2025-03-01T14:00:00+02:00")), Some(expected));
        assert_eq!(parse_date(&json!(millis)), Some(expected));
        assert_eq!(parse_date(&json!({ "$date": "2025-03-01T12:00:00Z" })), Some(expected));
        assert_eq!(parse_date(&json!({ "$date": millis })), Some(expected));
        assert_eq!(
            parse_date(&json!("2025-03-01")),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).single()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_date(&json!("tomorrow")), None);
        assert_eq!(parse_date(&json!(null)), None);
        assert_eq!(parse_date(&json!(true)), None);
        assert_eq!(parse_date(&json!({ "$date": [1] })), None);
        assert_eq!(parse_date(&json!({ "when": "2025-03-01" })), None);
    }
}
