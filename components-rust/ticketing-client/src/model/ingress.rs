//! Typed coercion for values that cross the service boundary.
//!
//! The backend encodes numbers and flags inconsistently (`12`, `"12"`,
//! `"12.50"`, `0/1`, `"true"`). Every record field that can arrive in more than
//! one shape goes through one of these functions exactly once, when the
//! response is decoded. Anything that is not a recognisable number, flag or
//! timestamp is rejected instead of being silently defaulted.

use chrono::{DateTime, NaiveDateTime, Utc};
use email_address::EmailAddress;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn parse_number<T, E>(text: &str) -> Result<T, E>
where
    T: FromStr,
    T::Err: Display,
    E: de::Error,
{
    text.trim()
        .parse::<T>()
        .map_err(|e| E::custom(format!("invalid number {text:?}: {e}")))
}

pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match NumberOrText::<T>::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => parse_number(&text),
    }
}

/// Like [`number`], with `null`, a missing field or `""` read as `None`.
pub fn opt_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match Option::<NumberOrText<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(value)) => Ok(Some(value)),
        Some(NumberOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(text)) => parse_number(&text).map(Some),
    }
}

/// Counter fields: like [`opt_number`], with an absent value read as zero.
pub fn count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr + Default,
    T::Err: Display,
{
    opt_number(deserializer).map(Option::unwrap_or_default)
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(value) => Ok(value),
        FlagRepr::Int(0) => Ok(false),
        FlagRepr::Int(1) => Ok(true),
        FlagRepr::Int(other) => Err(de::Error::custom(format!("invalid flag: {other}"))),
        FlagRepr::Text(text) => match text.trim() {
            "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(de::Error::custom(format!("invalid flag: {other:?}"))),
        },
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(value.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// RFC 3339, or a zone-less `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text:?}")))
}

pub fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text:?}"))),
    }
}

pub fn opt_email<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => EmailAddress::from_str(text.trim())
            .map(|email| Some(email.to_string()))
            .map_err(|e| de::Error::custom(format!("invalid email {text:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "number")]
        id: u64,
        #[serde(deserialize_with = "number")]
        price: f64,
        #[serde(default, deserialize_with = "opt_number")]
        rating: Option<u8>,
        #[serde(deserialize_with = "flag")]
        has_liked: bool,
        #[serde(deserialize_with = "timestamp")]
        modified_at: DateTime<Utc>,
        #[serde(default, deserialize_with = "opt_email")]
        email: Option<String>,
    }

    fn sample(json: serde_json::Value) -> Result<Sample, serde_json::Error> {
        serde_json::from_value(json)
    }

    #[test]
    fn test_numbers_from_strings() {
        let value = sample(serde_json::json!({
            "id": "42",
            "price": "12.50",
            "rating": "4",
            "has_liked": "1",
            "modified_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(value.id, 42);
        assert_eq!(value.price, 12.5);
        assert_eq!(value.rating, Some(4));
        assert!(value.has_liked);
        assert_eq!(value.email, None);
    }

    #[test]
    fn test_numbers_native() {
        let value = sample(serde_json::json!({
            "id": 7,
            "price": 20,
            "rating": null,
            "has_liked": 0,
            "modified_at": "2024-03-01 10:00:00"
        }))
        .unwrap();

        assert_eq!(value.id, 7);
        assert_eq!(value.price, 20.0);
        assert_eq!(value.rating, None);
        assert!(!value.has_liked);
        assert_eq!(
            value.modified_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_empty_optional_number() {
        let value = sample(serde_json::json!({
            "id": 1,
            "price": 1,
            "rating": "",
            "has_liked": true,
            "modified_at": "2024-03-01T10:00:00+02:00"
        }))
        .unwrap();

        assert_eq!(value.rating, None);
        assert_eq!(
            value.modified_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_rejects_garbage_number() {
        let result = sample(serde_json::json!({
            "id": "forty-two",
            "price": 1,
            "has_liked": 0,
            "modified_at": "2024-03-01T10:00:00Z"
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_flag() {
        let result = sample(serde_json::json!({
            "id": 1,
            "price": 1,
            "has_liked": 2,
            "modified_at": "2024-03-01T10:00:00Z"
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let result = sample(serde_json::json!({
            "id": 1,
            "price": 1,
            "has_liked": 0,
            "modified_at": "yesterday"
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_email_validation() {
        let ok = sample(serde_json::json!({
            "id": 1,
            "price": 1,
            "has_liked": 0,
            "modified_at": "2024-03-01T10:00:00Z",
            "email": "jane@example.com"
        }))
        .unwrap();
        assert_eq!(ok.email.as_deref(), Some("jane@example.com"));

        let bad = sample(serde_json::json!({
            "id": 1,
            "price": 1,
            "has_liked": 0,
            "modified_at": "2024-03-01T10:00:00Z",
            "email": "not-an-email"
        }));
        assert!(bad.is_err());
    }
}
