//! Parsers for the AT response families the monitor understands.
//!
//! Every function here is total: any input, including an empty string or a
//! line belonging to a different command, yields a value. Failures degrade to
//! `None` / `Unknown` and are logged at debug level.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::debug;

/// CSQ value the modem reports when the signal is not known or not detectable.
pub const CSQ_NO_SIGNAL: u8 = 99;
/// dBm reported for [`CSQ_NO_SIGNAL`].
pub const NO_SIGNAL_DBM: i32 = -120;

pub const QUALITY_FLOOR_DBM: i32 = -120;
pub const QUALITY_CEILING_DBM: i32 = -50;

/// A parsed `+CSQ` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSample {
    /// Raw CSQ value, in `0..=31` or [`CSQ_NO_SIGNAL`].
    pub csq: u8,
    pub dbm: i32,
    /// 0..=100
    pub quality: u8,
}

impl SignalSample {
    pub fn from_csq(csq: u8) -> Self {
        let csq = if csq == CSQ_NO_SIGNAL {
            csq
        } else {
            csq.min(31)
        };
        let dbm = csq_to_dbm(csq);

        Self {
            csq,
            dbm,
            quality: signal_quality(dbm),
        }
    }
}

/// Converts a CSQ value to dBm. Values above 31 (other than 99) are clamped.
pub fn csq_to_dbm(csq: u8) -> i32 {
    if csq == CSQ_NO_SIGNAL {
        return NO_SIGNAL_DBM;
    }

    2 * i32::from(csq.min(31)) - 113
}

/// Maps dBm linearly from `[-120, -50]` onto `[0, 100]`, clamping outside.
pub fn signal_quality(dbm: i32) -> u8 {
    if dbm >= QUALITY_CEILING_DBM {
        return 100;
    }
    if dbm <= QUALITY_FLOOR_DBM {
        return 0;
    }

    let span = QUALITY_CEILING_DBM - QUALITY_FLOOR_DBM;
    ((dbm - QUALITY_FLOOR_DBM) * 100 / span) as u8
}

/// Network generation derived from the `+CGREG` status code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationState {
    #[default]
    Unknown,
    #[serde(rename = "2G")]
    Gsm2G,
    #[serde(rename = "3G")]
    Network3G,
    #[serde(rename = "4G")]
    Network4G,
    #[serde(rename = "5G")]
    Network5G,
}

impl RegistrationState {
    /// Unmapped codes are `Unknown`, never an error.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Gsm2G,
            2 => Self::Network3G,
            3 => Self::Network4G,
            4 => Self::Network5G,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Gsm2G => "2G",
            Self::Network3G => "3G",
            Self::Network4G => "4G",
            Self::Network5G => "5G",
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_uppercase().as_str() {
            "2G" | "GSM" => Self::Gsm2G,
            "3G" => Self::Network3G,
            "4G" | "LTE" => Self::Network4G,
            "5G" => Self::Network5G,
            _ => Self::Unknown,
        };

        Ok(state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    pub name: String,
    pub present: bool,
}

impl OperatorInfo {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn unknown() -> Self {
        Self {
            name: Self::UNKNOWN.to_owned(),
            present: false,
        }
    }

    fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            present: true,
        }
    }
}

impl fmt::Display for OperatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Coarse cell-tower location. There is no zero fallback: a failed fix is
/// [`GeoFix::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GeoFix {
    Fix { latitude: f64, longitude: f64 },
    Unavailable,
}

impl GeoFix {
    pub fn latitude(&self) -> Option<f64> {
        match self {
            Self::Fix { latitude, .. } => Some(*latitude),
            Self::Unavailable => None,
        }
    }

    pub fn longitude(&self) -> Option<f64> {
        match self {
            Self::Fix { longitude, .. } => Some(*longitude),
            Self::Unavailable => None,
        }
    }
}

/// Returns the comma-separated payload that follows `prefix` in `response`.
///
/// The prefix may appear anywhere in the text so that stray echo or noise in
/// front of it does not matter.
fn payload_after<'a>(response: &'a str, prefix: &str) -> Option<&'a str> {
    response
        .lines()
        .find_map(|line| line.find(prefix).map(|idx| &line[idx + prefix.len()..]))
        .map(str::trim)
}

fn split_fields(payload: &str) -> Vec<&str> {
    payload.split(',').map(str::trim).collect()
}

/// `+CSQ: <rssi>,<ber>`
pub fn parse_csq(response: &str) -> Option<SignalSample> {
    let Some(payload) = payload_after(response, "+CSQ:") else {
        debug!(response, "no +CSQ payload in response");
        return None;
    };
    let field = split_fields(payload).into_iter().next()?;

    match field.parse::<i64>() {
        Ok(v) if v == i64::from(CSQ_NO_SIGNAL) => Some(SignalSample::from_csq(CSQ_NO_SIGNAL)),
        Ok(v) => Some(SignalSample::from_csq(v.clamp(0, 31) as u8)),
        Err(e) => {
            debug!(response, error = %e, "failed to parse CSQ value");
            None
        }
    }
}

/// `+COPS: <mode>,<format>,"<oper>"[,<act>]`
pub fn parse_cops(response: &str) -> OperatorInfo {
    let name = payload_after(response, "+COPS:").and_then(|payload| {
        split_fields(payload)
            .get(2)
            .map(|f| f.trim_matches('"').trim())
            .filter(|f| !f.is_empty())
    });

    match name {
        Some(name) => OperatorInfo::named(name),
        None => {
            debug!(response, "no operator name in +COPS response");
            OperatorInfo::unknown()
        }
    }
}

/// `+CGREG: <n>,<stat>`
pub fn parse_cgreg(response: &str) -> RegistrationState {
    let code = payload_after(response, "+CGREG:").and_then(|payload| {
        split_fields(payload)
            .get(1)
            .and_then(|f| f.parse::<i64>().ok())
    });

    match code {
        Some(code) => RegistrationState::from_code(code),
        None => {
            debug!(response, "failed to parse +CGREG status");
            RegistrationState::Unknown
        }
    }
}

/// `+CIPGSMLOC: <locationcode>,<longitude>,<latitude>,<date>,<time>`
///
/// Field order follows the SIM800 series AT manual: longitude precedes
/// latitude. A non-zero location code means the fix failed.
pub fn parse_cipgsmloc(response: &str) -> GeoFix {
    let Some(payload) = payload_after(response, "+CIPGSMLOC:") else {
        debug!(response, "no +CIPGSMLOC payload in response");
        return GeoFix::Unavailable;
    };
    let fields = split_fields(payload);

    if fields.first().and_then(|c| c.parse::<i64>().ok()) != Some(0) {
        debug!(response, "location request reported a failure code");
        return GeoFix::Unavailable;
    }

    let coord = |idx: usize| {
        fields
            .get(idx)
            .and_then(|f| f.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };

    match (coord(1), coord(2)) {
        (Some(longitude), Some(latitude))
            if (-180.0..=180.0).contains(&longitude)
                && (-90.0..=90.0).contains(&latitude) =>
        {
            GeoFix::Fix {
                latitude,
                longitude,
            }
        }
        _ => {
            debug!(response, "failed to parse +CIPGSMLOC coordinates");
            GeoFix::Unavailable
        }
    }
}

/// `+CPIN: <code>`; true only when the SIM reports `READY`.
pub fn parse_cpin(response: &str) -> bool {
    match payload_after(response, "+CPIN:") {
        Some(code) => code == "READY",
        None => response.trim() == "READY",
    }
}

/// Any response containing `OK` counts as a live module.
pub fn is_ok(response: &str) -> bool {
    response.contains("OK")
}
