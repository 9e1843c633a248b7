use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DeserializeAs, DisplayFromStr, PickFirst};
use std::fmt;
use std::str::FromStr;
use tracker_sim::Telemetry;

use crate::errors::Error;

/// Fallback base-station position used before any heartbeat arrives.
pub const FALLBACK_LATITUDE: f64 = 12.9692;
pub const FALLBACK_LONGITUDE: f64 = 79.1559;

/// Packets-per-minute reported for hardware uploads.
pub const HARDWARE_DATA_RATE: u32 = 15;

/// Where a packet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Simulated,
    Live,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Simulated => "simulated",
            Mode::Live => "live",
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "simulated" => Ok(Mode::Simulated),
            "live" => Ok(Mode::Live),
            other => Err(Error::Validation(format!("Unknown packet mode: {}", other))),
        }
    }
}

/// Which live source is authoritative for external reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Simulated,
    Hardware,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Simulated => "simulated",
            Source::Hardware => "hardware",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" => Ok(Source::Simulated),
            "hardware" => Ok(Source::Hardware),
            other => Err(Error::Validation(format!("Invalid source: {}", other))),
        }
    }
}

/// One telemetry sample. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelemetryPacket {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub satellites: u32,
    pub battery: f64,
    pub rssi: i32,
    pub temperature: f64,
    pub humidity: f64,
    #[sqlx(try_from = "String")]
    pub mode: Mode,
    pub data_rate: u32,
    pub packet_loss: u32,
    pub latency: u32,
}

impl TelemetryPacket {
    /// Packet shown before the first simulator tick.
    pub fn initial() -> Self {
        Self {
            timestamp: Utc::now(),
            latitude: FALLBACK_LATITUDE,
            longitude: FALLBACK_LONGITUDE,
            altitude: 310.0,
            speed: 0.5,
            satellites: 6,
            battery: 3.78,
            rssi: -65,
            temperature: 0.0,
            humidity: 0.0,
            mode: Mode::Simulated,
            data_rate: 15,
            packet_loss: 0,
            latency: 25,
        }
    }
}

impl From<Telemetry> for TelemetryPacket {
    fn from(t: Telemetry) -> Self {
        Self {
            timestamp: t.timestamp,
            latitude: t.latitude,
            longitude: t.longitude,
            altitude: t.altitude,
            speed: t.speed,
            satellites: t.satellites,
            battery: t.battery,
            rssi: t.rssi,
            temperature: t.temperature,
            humidity: t.humidity,
            mode: Mode::Simulated,
            data_rate: t.data_rate,
            packet_loss: t.packet_loss,
            latency: t.latency,
        }
    }
}

/// A packet as read back from history, with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredPacket {
    pub id: i64,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub packet: TelemetryPacket,
}

/// Base-station heartbeat snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReceiverStatus {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub signal_strength: i32,
    pub is_online: bool,
}

impl ReceiverStatus {
    /// Offline status at the fallback coordinates.
    pub fn offline_fallback() -> Self {
        Self {
            timestamp: Utc::now(),
            latitude: FALLBACK_LATITUDE,
            longitude: FALLBACK_LONGITUDE,
            signal_strength: 0,
            is_online: false,
        }
    }

    /// Fixed base station reported while the simulated source is shown.
    pub fn simulated_base_station() -> Self {
        Self {
            timestamp: Utc::now(),
            latitude: FALLBACK_LATITUDE,
            longitude: FALLBACK_LONGITUDE,
            signal_strength: -65,
            is_online: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(Error::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated identity; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
}

/// Stored credential row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Credential {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<Credential> for User {
    fn from(c: Credential) -> Self {
        Self {
            id: c.id,
            username: c.username,
            role: c.role,
        }
    }
}

/// Accepts an integer, a float (truncated) or a numeric string for an integer field.
pub struct LenientInt;

impl<'de, T> DeserializeAs<'de, T> for LenientInt
where
    T: TryFrom<i64>,
{
    fn deserialize_as<D>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Numeric {
            Int(i64),
            Float(f64),
            Text(String),
        }

        let truncate = |v: f64| v.is_finite().then(|| v.trunc() as i64);
        let value = match Numeric::deserialize(deserializer)? {
            Numeric::Int(v) => Some(v),
            Numeric::Float(v) => truncate(v),
            Numeric::Text(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().and_then(truncate))
            }
        }
        .ok_or_else(|| D::Error::custom("expected a number"))?;

        T::try_from(value).map_err(|_| D::Error::custom(format!("{} is out of range", value)))
    }
}

/// Hardware tracker upload body. Only the coordinates are required.
///
/// Firmware sends numbers loosely typed, so floats also accept numeric
/// strings and integers also accept floats.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareUpload {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub latitude: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub longitude: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub altitude: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub speed: Option<f64>,
    #[serde_as(as = "Option<LenientInt>")]
    pub satellites: Option<u32>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub battery: Option<f64>,
    #[serde_as(as = "Option<LenientInt>")]
    pub rssi: Option<i32>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub temperature: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub humidity: Option<f64>,
    #[serde_as(as = "Option<LenientInt>")]
    pub packet_loss: Option<u32>,
    #[serde_as(as = "Option<LenientInt>")]
    pub latency: Option<u32>,
}

/// Receiver heartbeat body; absent values default to zero.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Heartbeat {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub latitude: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub longitude: f64,
    #[serde_as(as = "LenientInt")]
    #[serde(default)]
    pub signal_strength: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRequest {
    pub source: Option<String>,
}

/// Preference plus hardware liveness.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: Source,
    pub hardware_online: bool,
    pub last_hardware_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct SourceResponse {
    pub success: bool,
    pub source: Source,
}
