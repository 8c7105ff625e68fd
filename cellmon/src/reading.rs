use crate::parser::{signal_quality, GeoFix, OperatorInfo, RegistrationState, SignalSample};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Fixed-width, lexicographically sortable.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What was measured, before it is assigned an id and a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub operator: String,
    /// dBm, `"Unknown"` on disk when absent.
    #[serde(with = "unknown_as_str")]
    pub signal_strength: Option<i32>,
    pub network_type: RegistrationState,
    /// True iff a signal sample was parsed.
    #[serde(default = "available_by_default")]
    pub availability: bool,
    #[serde(with = "unknown_as_str")]
    pub latitude: Option<f64>,
    #[serde(with = "unknown_as_str")]
    pub longitude: Option<f64>,
}

fn available_by_default() -> bool {
    true
}

impl Observation {
    pub fn new(
        signal: Option<SignalSample>,
        operator: OperatorInfo,
        network_type: RegistrationState,
        location: GeoFix,
    ) -> Self {
        Self {
            operator: operator.name,
            signal_strength: signal.map(|s| s.dbm),
            network_type,
            availability: signal.is_some(),
            latitude: location.latitude(),
            longitude: location.longitude(),
        }
    }

    pub fn signal_quality(&self) -> Option<u8> {
        self.signal_strength.map(signal_quality)
    }
}

/// An immutable, persisted measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub observation: Observation,
}

pub mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// `Option<T>` stored as the value itself, or the string `"Unknown"` when
/// absent. Numeric strings are accepted on input.
pub mod unknown_as_str {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub const UNKNOWN: &str = "Unknown";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ValueOrStr<T> {
        Value(T),
        Str(String),
    }

    pub fn serialize<T, S>(value: &Option<T>, s: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(v) => v.serialize(s),
            None => s.serialize_str(UNKNOWN),
        }
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<Option<T>, D::Error>
    where
        T: Deserialize<'de> + FromStr,
        D: Deserializer<'de>,
    {
        match Option::<ValueOrStr<T>>::deserialize(d)? {
            Some(ValueOrStr::Value(v)) => Ok(Some(v)),
            Some(ValueOrStr::Str(s)) if s == UNKNOWN || s.is_empty() => Ok(None),
            Some(ValueOrStr::Str(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
            None => Ok(None),
        }
    }
}
