//! Plain-text export of stored packets, one line per packet.
//!
//! `export_recent` rewrites the file from the latest rows and `follow` then
//! appends every packet stored after them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::db::Store;
use crate::errors::Result;
use crate::model::StoredPacket;

pub const DEFAULT_LOG_FILE: &str = "received_gps_data.log";

pub fn format_line(stored: &StoredPacket) -> String {
    let p = &stored.packet;
    format!(
        "[{}] LAT:{}, LON:{}, ALT:{}, SPD:{}, SAT:{}, BAT:{}, RSSI:{}\n",
        p.timestamp.to_rfc3339(),
        p.latitude,
        p.longitude,
        p.altitude,
        p.speed,
        p.satellites,
        p.battery,
        p.rssi
    )
}

pub struct PacketLogger {
    store: Store,
    path: PathBuf,
}

impl PacketLogger {
    pub fn new(store: Store, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the file and writes the newest `limit` packets oldest first.
    /// Returns the id to follow from.
    pub async fn export_recent(&self, limit: usize) -> Result<i64> {
        let mut packets = self.store.latest_packets(limit).await?;
        packets.reverse();

        let mut file = File::create(&self.path).await?;
        write_lines(&mut file, &packets).await?;

        let last_id = self.store.max_packet_id().await?;
        info!(
            count = packets.len(),
            last_id,
            "Exported packets to {}",
            self.path.display()
        );
        Ok(last_id)
    }

    /// Appends packets stored after `after_id` and returns the new high-water id.
    pub async fn append_new(&self, after_id: i64) -> Result<i64> {
        let packets = self.store.packets_after(after_id).await?;
        let Some(last) = packets.last() else {
            return Ok(after_id);
        };
        let last_id = last.id;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        write_lines(&mut file, &packets).await?;

        info!(count = packets.len(), last_id, "Logged new packets");
        Ok(last_id)
    }

    /// Polls for new packets until `stop` flips. A failed poll is logged and
    /// retried on the next tick.
    pub async fn follow(&self, mut last_id: i64, every: Duration, mut stop: watch::Receiver<bool>) {
        info!("Following packets from id {}", last_id);

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.append_new(last_id).await {
                        Ok(id) => last_id = id,
                        Err(e) => error!("Packet log poll failed: {}", e),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Packet logger stopped at id {}", last_id);
    }
}

async fn write_lines(file: &mut File, packets: &[StoredPacket]) -> Result<()> {
    let mut buf = String::new();
    for packet in packets {
        buf.push_str(&format_line(packet));
    }
    file.write_all(buf.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store;
    use crate::model::TelemetryPacket;
    use chrono::{TimeZone, Utc};

    fn packet(latitude: f64) -> TelemetryPacket {
        TelemetryPacket {
            latitude,
            ..TelemetryPacket::initial()
        }
    }

    fn logger(store: Store, dir: &tempfile::TempDir) -> PacketLogger {
        PacketLogger::new(store, dir.path().join("packets.log"))
    }

    async fn read_lines(logger: &PacketLogger) -> Vec<String> {
        tokio::fs::read_to_string(logger.path())
            .await
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_format_line() {
        let stored = StoredPacket {
            id: 1,
            packet: TelemetryPacket {
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
                latitude: 12.97,
                longitude: 79.16,
                altitude: 310.5,
                speed: 1.2,
                satellites: 7,
                battery: 3.8,
                rssi: -61,
                ..TelemetryPacket::initial()
            },
        };
        assert_eq!(
            format_line(&stored),
            "[2024-05-01T10:30:00+00:00] LAT:12.97, LON:79.16, ALT:310.5, SPD:1.2, SAT:7, BAT:3.8, RSSI:-61\n"
        );
    }

    #[tokio::test]
    async fn test_export_recent_truncates_and_orders_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store().await;
        for i in 0..4 {
            store.append_packet(&packet(10.0 + i as f64)).await.unwrap();
        }
        let logger = logger(store.clone(), &dir);
        tokio::fs::write(logger.path(), "stale line\n").await.unwrap();

        let last_id = logger.export_recent(3).await.unwrap();
        assert_eq!(last_id, store.max_packet_id().await.unwrap());

        let lines = read_lines(&logger).await;
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("LAT:11,"));
        assert!(lines[2].contains("LAT:13,"));
    }

    #[tokio::test]
    async fn test_append_new_only_writes_unseen_packets() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store().await;
        let logger = logger(store.clone(), &dir);

        let last_id = logger.export_recent(1000).await.unwrap();
        assert_eq!(last_id, 0);
        assert!(read_lines(&logger).await.is_empty());

        store.append_packet(&packet(1.5)).await.unwrap();
        store.append_packet(&packet(2.5)).await.unwrap();
        let last_id = logger.append_new(last_id).await.unwrap();
        assert_eq!(logger.append_new(last_id).await.unwrap(), last_id);

        let lines = read_lines(&logger).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("LAT:1.5,"));
        assert!(lines[1].contains("LAT:2.5,"));
    }

    #[tokio::test]
    async fn test_follow_picks_up_new_packets_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store().await;
        let logger = std::sync::Arc::new(logger(store.clone(), &dir));
        let last_id = logger.export_recent(1000).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = {
            let logger = logger.clone();
            tokio::spawn(async move {
                logger
                    .follow(last_id, Duration::from_millis(10), stop_rx)
                    .await
            })
        };

        store.append_packet(&packet(4.25)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let lines = read_lines(&logger).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("LAT:4.25,"));
    }
}
