use crate::errors::Result;
use crate::metrics::{DB_FAILURES_TOTAL, PACKETS_PERSISTED_TOTAL};
use crate::model::{Credential, ReceiverStatus, StoredPacket, TelemetryPacket, User};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

const PACKET_COLUMNS: &str = "id, timestamp, latitude, longitude, altitude, speed, satellites, \
     battery, rssi, temperature, humidity, mode, data_rate, packet_loss, latency";

/// Outcome of a user insert; a taken username is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUser {
    Created(i64),
    Conflict,
}

/// Append-only SQLite storage for packets, receiver heartbeats and users.
///
/// Every write is a single-row autocommit insert, so concurrent appends from
/// the simulator and upload handlers never interleave within a row.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = make_pool(database_url, max_connections).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn append_packet(&self, packet: &TelemetryPacket) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO packets (timestamp, latitude, longitude, altitude, speed, satellites,
                                 battery, rssi, temperature, humidity, mode, data_rate,
                                 packet_loss, latency)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(packet.timestamp)
        .bind(packet.latitude)
        .bind(packet.longitude)
        .bind(packet.altitude)
        .bind(packet.speed)
        .bind(packet.satellites)
        .bind(packet.battery)
        .bind(packet.rssi)
        .bind(packet.temperature)
        .bind(packet.humidity)
        .bind(packet.mode.as_str())
        .bind(packet.data_rate)
        .bind(packet.packet_loss)
        .bind(packet.latency)
        .execute(&self.pool)
        .await
        .map_err(record_failure)?;

        PACKETS_PERSISTED_TOTAL.inc();
        Ok(result.last_insert_rowid())
    }

    pub async fn append_receiver_status(&self, status: &ReceiverStatus) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO receiver_status (timestamp, latitude, longitude, signal_strength, is_online)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(status.timestamp)
        .bind(status.latitude)
        .bind(status.longitude)
        .bind(status.signal_strength)
        .bind(status.is_online)
        .execute(&self.pool)
        .await
        .map_err(record_failure)?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent `n` packets, newest first.
    pub async fn latest_packets(&self, n: usize) -> Result<Vec<StoredPacket>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let query = format!(
            "SELECT {} FROM packets ORDER BY id DESC LIMIT ?",
            PACKET_COLUMNS
        );

        let packets = sqlx::query_as::<_, StoredPacket>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(packets)
    }

    /// Packets with an id above `after_id`, oldest first.
    pub async fn packets_after(&self, after_id: i64) -> Result<Vec<StoredPacket>> {
        let query = format!(
            "SELECT {} FROM packets WHERE id > ? ORDER BY id ASC",
            PACKET_COLUMNS
        );

        let packets = sqlx::query_as::<_, StoredPacket>(&query)
            .bind(after_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(packets)
    }

    /// Highest packet id, or 0 for an empty table.
    pub async fn max_packet_id(&self) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(id), 0) FROM packets")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn count_packets(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM packets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn last_receiver_status(&self) -> Result<Option<ReceiverStatus>> {
        let status = sqlx::query_as::<_, ReceiverStatus>(
            r#"
            SELECT timestamp, latitude, longitude, signal_strength, is_online
            FROM receiver_status
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    pub async fn insert_user(
        &self,
        username: &str,
        password_hash: &str,
        role: crate::model::Role,
    ) -> Result<CreateUser> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(CreateUser::Created(done.last_insert_rowid())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(CreateUser::Conflict)
            }
            Err(e) => Err(record_failure(e)),
        }
    }

    pub async fn find_credential(&self, username: &str) -> Result<Option<Credential>> {
        let credential = sqlx::query_as::<_, Credential>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credential)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, username, role FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Returns whether a row was updated.
    pub async fn update_password_hash(&self, username: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE username = ?")
            .bind(password_hash)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(record_failure)?;

        Ok(result.rows_affected() > 0)
    }
}

async fn make_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    info!("Connecting to database...");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    // In-memory databases vanish with their last connection, so keep them alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

fn record_failure(e: sqlx::Error) -> crate::errors::Error {
    error!("Database write failed: {}", e);
    DB_FAILURES_TOTAL.inc();
    e.into()
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    Store::connect("sqlite::memory:", 1).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mode, Role};
    use chrono::Utc;

    fn packet(latitude: f64) -> TelemetryPacket {
        TelemetryPacket {
            latitude,
            mode: Mode::Live,
            ..TelemetryPacket::initial()
        }
    }

    #[tokio::test]
    async fn test_latest_packets_newest_first() {
        let store = memory_store().await;
        for i in 0..5 {
            store.append_packet(&packet(10.0 + i as f64)).await.unwrap();
        }

        let latest = store.latest_packets(3).await.unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].packet.latitude, 14.0);
        assert_eq!(latest[1].packet.latitude, 13.0);
        assert_eq!(latest[2].packet.latitude, 12.0);
        assert!(latest.windows(2).all(|w| w[0].id > w[1].id));
        assert_eq!(latest[0].packet.mode, Mode::Live);
    }

    #[tokio::test]
    async fn test_latest_packets_fewer_than_requested() {
        let store = memory_store().await;
        store.append_packet(&packet(1.0)).await.unwrap();
        assert_eq!(store.latest_packets(100).await.unwrap().len(), 1);
        assert!(store.latest_packets(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_packet_fields_survive_storage() {
        let store = memory_store().await;
        let original = packet(13.0);
        let id = store.append_packet(&original).await.unwrap();

        let stored = store.latest_packets(1).await.unwrap().remove(0);
        assert_eq!(stored.id, id);
        assert_eq!(stored.packet.satellites, original.satellites);
        assert_eq!(stored.packet.rssi, original.rssi);
        assert_eq!(stored.packet.latency, original.latency);
        assert_eq!(
            stored.packet.timestamp.timestamp_micros(),
            original.timestamp.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_packets_after_is_oldest_first() {
        let store = memory_store().await;
        assert_eq!(store.max_packet_id().await.unwrap(), 0);

        let first = store.append_packet(&packet(1.0)).await.unwrap();
        store.append_packet(&packet(2.0)).await.unwrap();
        let last = store.append_packet(&packet(3.0)).await.unwrap();
        assert_eq!(store.max_packet_id().await.unwrap(), last);

        let after = store.packets_after(first).await.unwrap();
        let latitudes: Vec<f64> = after.iter().map(|p| p.packet.latitude).collect();
        assert_eq!(latitudes, vec![2.0, 3.0]);
        assert!(store.packets_after(last).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receiver_status_latest() {
        let store = memory_store().await;
        assert!(store.last_receiver_status().await.unwrap().is_none());

        for signal in [-70, -60] {
            let status = ReceiverStatus {
                timestamp: Utc::now(),
                latitude: 12.97,
                longitude: 79.16,
                signal_strength: signal,
                is_online: true,
            };
            store.append_receiver_status(&status).await.unwrap();
        }

        let last = store.last_receiver_status().await.unwrap().unwrap();
        assert_eq!(last.signal_strength, -60);
        assert!(last.is_online);
    }

    #[tokio::test]
    async fn test_duplicate_user_is_conflict() {
        let store = memory_store().await;
        let first = store.insert_user("alice", "hash", Role::User).await.unwrap();
        assert!(matches!(first, CreateUser::Created(_)));

        let second = store.insert_user("alice", "other", Role::Admin).await.unwrap();
        assert_eq!(second, CreateUser::Conflict);
    }

    #[tokio::test]
    async fn test_update_password_hash() {
        let store = memory_store().await;
        store.insert_user("bob", "old", Role::User).await.unwrap();

        assert!(store.update_password_hash("bob", "new").await.unwrap());
        assert!(!store.update_password_hash("nobody", "new").await.unwrap());

        let credential = store.find_credential("bob").await.unwrap().unwrap();
        assert_eq!(credential.password_hash, "new");
        assert_eq!(credential.role, Role::User);
    }
}
