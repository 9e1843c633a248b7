use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One synthetic tracker reading produced by the random walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
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
    pub data_rate: u32,
    pub packet_loss: u32,
    pub latency: u32,
}
