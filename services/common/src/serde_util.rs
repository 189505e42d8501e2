//! Serde helpers for venue payloads
//!
//! Binance futures REST and stream payloads carry most numeric fields as
//! JSON strings ("1.500", "43210.10"). These modules deserialize either
//! representation into `f64` so domain types stay numeric.

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(f64),
    Text(String),
}

fn parse(value: StringOrNumber) -> Result<f64, String> {
    match value {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("not a numeric string: {s:?}")),
    }
}

/// `f64` field that the venue may encode as a JSON string.
pub mod f64_str {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = StringOrNumber::deserialize(deserializer)?;
        parse(value).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(*value)
    }
}

/// Optional `f64` field that the venue may encode as a JSON string.
pub mod f64_str_opt {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<StringOrNumber>::deserialize(deserializer)?;
        value
            .map(|v| parse(v).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub fn serialize<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(v),
            None => serializer.serialize_none(),
        }
    }
}
