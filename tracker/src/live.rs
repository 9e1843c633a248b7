//! Live-state reconciliation between the simulated and hardware sources.
//!
//! All three slots and the visible packet live behind one lock, so a reader
//! never sees `visible` from one update paired with slots from another.
//! Writers are additionally serialized by `writes`, held from stamping a
//! packet until it is appended, so slot order always matches history order.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::db::Store;
use crate::errors::Result;
use crate::metrics::{HEARTBEATS_TOTAL, UPLOADS_TOTAL};
use crate::model::{
    HardwareUpload, Heartbeat, Mode, ReceiverStatus, Source, SourceStatus, StoredPacket,
    TelemetryPacket, HARDWARE_DATA_RATE,
};
use crate::validate::validate_upload;

#[derive(Debug, Clone)]
struct LiveState {
    latest_simulated: TelemetryPacket,
    latest_hardware: Option<TelemetryPacket>,
    preferred: Source,
    latest_visible: TelemetryPacket,
    last_hardware_update: Option<DateTime<Utc>>,
    receiver: Option<ReceiverStatus>,
}

impl LiveState {
    fn new(initial: TelemetryPacket) -> Self {
        Self {
            latest_simulated: initial.clone(),
            latest_hardware: None,
            preferred: Source::Simulated,
            latest_visible: initial,
            last_hardware_update: None,
            receiver: None,
        }
    }
}

#[derive(Debug)]
pub struct Reconciler {
    state: RwLock<LiveState>,
    writes: Mutex<()>,
    store: Store,
    hardware_timeout: Duration,
}

impl Reconciler {
    pub fn new(store: Store, hardware_timeout: Duration) -> Self {
        Self::with_initial(store, hardware_timeout, TelemetryPacket::initial())
    }

    pub fn with_initial(store: Store, hardware_timeout: Duration, initial: TelemetryPacket) -> Self {
        Self {
            state: RwLock::new(LiveState::new(initial)),
            writes: Mutex::new(()),
            store,
            hardware_timeout,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Accepts a hardware packet. Server time replaces any device time and
    /// missing readings default to zero. The packet is always persisted.
    pub async fn upload_hardware(&self, upload: HardwareUpload) -> Result<TelemetryPacket> {
        let (latitude, longitude) = validate_upload(&upload)?;

        let writes = self.writes.lock().await;
        let now = Utc::now();

        let packet = TelemetryPacket {
            timestamp: now,
            latitude,
            longitude,
            altitude: upload.altitude.unwrap_or(0.0),
            speed: upload.speed.unwrap_or(0.0),
            satellites: upload.satellites.unwrap_or(0),
            battery: upload.battery.unwrap_or(0.0),
            rssi: upload.rssi.unwrap_or(0),
            temperature: upload.temperature.unwrap_or(0.0),
            humidity: upload.humidity.unwrap_or(0.0),
            mode: Mode::Live,
            data_rate: HARDWARE_DATA_RATE,
            packet_loss: upload.packet_loss.unwrap_or(0),
            latency: upload.latency.unwrap_or(0),
        };

        {
            let mut state = self.state.write().await;
            state.last_hardware_update = Some(now);
            state.latest_hardware = Some(packet.clone());
            if state.preferred == Source::Hardware {
                state.latest_visible = packet.clone();
            }
        }

        self.store.append_packet(&packet).await?;
        drop(writes);
        UPLOADS_TOTAL.inc();

        info!(
            "Received packet: LAT={}, LON={}, ALT={}, SPD={}, SAT={}, BAT={}, RSSI={}",
            packet.latitude,
            packet.longitude,
            packet.altitude,
            packet.speed,
            packet.satellites,
            packet.battery,
            packet.rssi
        );

        Ok(packet)
    }

    /// Caches a simulator tick. It becomes visible and is persisted only while
    /// the simulated source is preferred; returns the row id when persisted.
    pub async fn record_simulated(&self, packet: TelemetryPacket) -> Result<Option<i64>> {
        let _writes = self.writes.lock().await;
        let surfaced = {
            let mut state = self.state.write().await;
            state.latest_simulated = packet.clone();
            if state.preferred == Source::Simulated {
                state.latest_visible = packet.clone();
                true
            } else {
                false
            }
        };

        if !surfaced {
            debug!("Hardware preferred, simulated packet cached only");
            return Ok(None);
        }

        let id = self.store.append_packet(&packet).await?;
        Ok(Some(id))
    }

    /// Switches the authoritative source and returns the packet now visible.
    pub async fn set_preference(&self, source: Source) -> TelemetryPacket {
        let _writes = self.writes.lock().await;
        let mut state = self.state.write().await;
        state.preferred = source;
        match source {
            Source::Hardware => {
                if let Some(hardware) = &state.latest_hardware {
                    state.latest_visible = hardware.clone();
                }
            }
            Source::Simulated => {
                state.latest_visible = state.latest_simulated.clone();
            }
        }
        info!(source = source.as_str(), "Preferred data source changed");
        state.latest_visible.clone()
    }

    pub async fn preference(&self) -> Source {
        self.state.read().await.preferred
    }

    pub async fn visible(&self) -> TelemetryPacket {
        self.state.read().await.latest_visible.clone()
    }

    /// `None` until the first hardware upload.
    pub async fn hardware_only(&self) -> Option<TelemetryPacket> {
        self.state.read().await.latest_hardware.clone()
    }

    pub async fn simulated_only(&self) -> TelemetryPacket {
        self.state.read().await.latest_simulated.clone()
    }

    /// Staleness is reported here and nowhere else; it never flips the preference.
    pub async fn source_status(&self) -> SourceStatus {
        let state = self.state.read().await;
        let hardware_online = state
            .last_hardware_update
            .and_then(|at| (Utc::now() - at).to_std().ok())
            .is_some_and(|age| age <= self.hardware_timeout);

        SourceStatus {
            source: state.preferred,
            hardware_online,
            last_hardware_update: state.last_hardware_update,
        }
    }

    pub async fn record_heartbeat(&self, heartbeat: Heartbeat) -> Result<ReceiverStatus> {
        let status = ReceiverStatus {
            timestamp: Utc::now(),
            latitude: heartbeat.latitude,
            longitude: heartbeat.longitude,
            signal_strength: heartbeat.signal_strength,
            is_online: true,
        };

        self.state.write().await.receiver = Some(status.clone());
        self.store.append_receiver_status(&status).await?;
        HEARTBEATS_TOTAL.inc();

        Ok(status)
    }

    /// Live receiver position while hardware is preferred, else the fixed station.
    pub async fn base_station(&self) -> ReceiverStatus {
        let state = self.state.read().await;
        match (&state.preferred, &state.receiver) {
            (Source::Hardware, Some(receiver)) => receiver.clone(),
            _ => ReceiverStatus::simulated_base_station(),
        }
    }

    /// Last persisted heartbeat, or an offline fallback when none exists.
    pub async fn receiver_status(&self) -> Result<ReceiverStatus> {
        Ok(self
            .store
            .last_receiver_status()
            .await?
            .unwrap_or_else(ReceiverStatus::offline_fallback))
    }

    pub async fn history(&self, n: usize) -> Result<Vec<StoredPacket>> {
        self.store.latest_packets(n).await
    }
}
