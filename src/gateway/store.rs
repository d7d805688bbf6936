//! SQLite-backed WhatsApp session store.
//!
//! Implements the `wacore::store` backend traits on top of `sqlx`, keeping
//! all pairing state (device record, Signal key material, app-state sync
//! bookkeeping) in a single database file under the session directory. The
//! upstream Diesel-based storage crate drags in a second SQLite linkage, so
//! the backend is implemented here directly.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use wacore::appstate::hash::HashState;
use wacore::appstate::processor::AppStateMutationMAC;
use wacore::store::error::{db_err, Result, StoreError};
use wacore::store::traits::{
    AppStateSyncKey, AppSyncStore, DeviceListRecord, DeviceStore, LidPnMappingEntry, ProtocolStore,
    SignalStore,
};
use wacore::store::Device;

/// Database file name inside the session directory.
pub const SESSION_DB_FILE: &str = "wagate.db";

/// SQLx-backed storage for the paired WhatsApp session.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    device_id: i32,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS auth_device (
        id          INTEGER PRIMARY KEY,
        data        BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS auth_identities (
        address     TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        key         BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_sessions (
        address     TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        record      BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_prekeys (
        id          INTEGER NOT NULL,
        device_id   INTEGER NOT NULL,
        record      BLOB NOT NULL,
        uploaded    INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (id, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_signed_prekeys (
        id          INTEGER NOT NULL,
        device_id   INTEGER NOT NULL,
        record      BLOB NOT NULL,
        PRIMARY KEY (id, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_sender_keys (
        address     TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        record      BLOB NOT NULL,
        PRIMARY KEY (address, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_app_state_keys (
        key_id      BLOB NOT NULL,
        device_id   INTEGER NOT NULL,
        data        TEXT NOT NULL,
        PRIMARY KEY (key_id, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_app_state_versions (
        name        TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        data        TEXT NOT NULL,
        PRIMARY KEY (name, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_app_state_mutation_macs (
        name        TEXT NOT NULL,
        version     INTEGER NOT NULL,
        index_mac   BLOB NOT NULL,
        value_mac   BLOB NOT NULL,
        device_id   INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_auth_mutation_macs
        ON auth_app_state_mutation_macs (name, index_mac, device_id);
    CREATE TABLE IF NOT EXISTS auth_skdm_recipients (
        group_jid   TEXT NOT NULL,
        device_jid  TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        PRIMARY KEY (group_jid, device_jid, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_lid_pn_mapping (
        lid             TEXT NOT NULL,
        phone_number    TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        learning_source TEXT NOT NULL DEFAULT '',
        device_id       INTEGER NOT NULL,
        PRIMARY KEY (lid, device_id)
    );
    CREATE INDEX IF NOT EXISTS idx_auth_lid_pn_phone
        ON auth_lid_pn_mapping (phone_number, device_id);
    CREATE TABLE IF NOT EXISTS auth_base_keys (
        address     TEXT NOT NULL,
        message_id  TEXT NOT NULL,
        base_key    BLOB NOT NULL,
        device_id   INTEGER NOT NULL,
        PRIMARY KEY (address, message_id, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_device_registry (
        user        TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        data        TEXT NOT NULL,
        PRIMARY KEY (user, device_id)
    );
    CREATE TABLE IF NOT EXISTS auth_sender_key_forget (
        group_jid   TEXT NOT NULL,
        participant TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        PRIMARY KEY (group_jid, participant, device_id)
    );
"#;

impl SessionStore {
    /// Open (or create) the store at the given path.
    pub async fn new(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { pool, device_id: 1 };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        // sqlx executes one statement per call, so split the schema.
        for stmt in SCHEMA.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    /// Whether a paired device record exists and deserializes cleanly.
    pub async fn device_exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT data FROM auth_device WHERE id = ?")
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(match row {
            Some(r) => {
                let data: Vec<u8> = r.get("data");
                rmp_serde::from_slice::<Device>(&data).is_ok()
            }
            None => false,
        })
    }

    /// Best-effort lookup of the paired account identity.
    ///
    /// The device record is the library's own type; its shape is not part of
    /// the storage contract, so the JID and push name are extracted through a
    /// tolerant JSON round-trip. Returns `(raw_jid, push_name)` when found.
    pub async fn paired_identity(&self) -> Result<Option<(String, String)>> {
        let Some(device) = self.load().await? else {
            return Ok(None);
        };
        let value = match serde_json::to_value(&device) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let name = value
            .get("push_name")
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string();
        let raw = ["pn", "id", "jid"]
            .iter()
            .find_map(|key| value.get(*key).and_then(jid_string));
        Ok(raw.map(|jid| (jid, name)))
    }
}

/// Read a JID out of a serialized field that may be a plain string or a
/// `{user, server, device}` object, depending on the library version.
fn jid_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Object(map) => {
            let user = map.get("user")?.as_str()?;
            if user.is_empty() {
                return None;
            }
            let server = map
                .get("server")
                .and_then(|s| s.as_str())
                .unwrap_or("s.whatsapp.net");
            match map.get("device").and_then(|d| d.as_u64()) {
                Some(device) if device > 0 => Some(format!("{user}:{device}@{server}")),
                _ => Some(format!("{user}@{server}")),
            }
        }
        _ => None,
    }
}

/// Delete session files one by one. A missing directory is not an error;
/// per-file failures are collected into the returned error while the purge
/// keeps going.
pub fn purge_session_dir(dir: &Path) -> crate::error::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(crate::error::WagateError::SessionCleanup(e.to_string())),
    };

    let mut removed = 0;
    let mut failures = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => failures.push(format!("{}: {}", path.display(), e)),
            }
        }
    }
    if failures.is_empty() {
        Ok(removed)
    } else {
        Err(crate::error::WagateError::SessionCleanup(
            failures.join("; "),
        ))
    }
}

// ─── SignalStore ───────────────────────────────────────────────────────────

#[async_trait]
impl SignalStore for SessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_identities (address, device_id, key) VALUES (?, ?, ?)
             ON CONFLICT(address, device_id) DO UPDATE SET key = excluded.key",
        )
        .bind(address)
        .bind(self.device_id)
        .bind(key.as_slice())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_identity(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT key FROM auth_identities WHERE address = ? AND device_id = ?")
            .bind(address)
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("key")))
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_identities WHERE address = ? AND device_id = ?")
            .bind(address)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT record FROM auth_sessions WHERE address = ? AND device_id = ?")
            .bind(address)
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("record")))
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_sessions (address, device_id, record) VALUES (?, ?, ?)
             ON CONFLICT(address, device_id) DO UPDATE SET record = excluded.record",
        )
        .bind(address)
        .bind(self.device_id)
        .bind(session)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE address = ? AND device_id = ?")
            .bind(address)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_prekeys (id, device_id, record, uploaded) VALUES (?, ?, ?, ?)
             ON CONFLICT(id, device_id) DO UPDATE SET
                record = excluded.record, uploaded = excluded.uploaded",
        )
        .bind(id)
        .bind(self.device_id)
        .bind(record)
        .bind(uploaded)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT record FROM auth_prekeys WHERE id = ? AND device_id = ?")
            .bind(id)
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get("record")))
    }

    async fn remove_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM auth_prekeys WHERE id = ? AND device_id = ?")
            .bind(id)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_signed_prekeys (id, device_id, record) VALUES (?, ?, ?)
             ON CONFLICT(id, device_id) DO UPDATE SET record = excluded.record",
        )
        .bind(id)
        .bind(self.device_id)
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_signed_prekey(&self, id: u32) -> Result<Option<Vec<u8>>> {
        let row =
            sqlx::query("SELECT record FROM auth_signed_prekeys WHERE id = ? AND device_id = ?")
                .bind(id)
                .bind(self.device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|r| r.get("record")))
    }

    async fn load_all_signed_prekeys(&self) -> Result<Vec<(u32, Vec<u8>)>> {
        let rows = sqlx::query("SELECT id, record FROM auth_signed_prekeys WHERE device_id = ?")
            .bind(self.device_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("id") as u32, r.get("record")))
            .collect())
    }

    async fn remove_signed_prekey(&self, id: u32) -> Result<()> {
        sqlx::query("DELETE FROM auth_signed_prekeys WHERE id = ? AND device_id = ?")
            .bind(id)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_sender_keys (address, device_id, record) VALUES (?, ?, ?)
             ON CONFLICT(address, device_id) DO UPDATE SET record = excluded.record",
        )
        .bind(address)
        .bind(self.device_id)
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_sender_key(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let row =
            sqlx::query("SELECT record FROM auth_sender_keys WHERE address = ? AND device_id = ?")
                .bind(address)
                .bind(self.device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(|r| r.get("record")))
    }

    async fn delete_sender_key(&self, address: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_sender_keys WHERE address = ? AND device_id = ?")
            .bind(address)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

// ─── AppSyncStore ──────────────────────────────────────────────────────────

#[async_trait]
impl AppSyncStore for SessionStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        let row =
            sqlx::query("SELECT data FROM auth_app_state_keys WHERE key_id = ? AND device_id = ?")
                .bind(key_id)
                .bind(self.device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match row {
            Some(r) => {
                let json: String = r.get("data");
                let key = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> Result<()> {
        let json =
            serde_json::to_string(&key).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO auth_app_state_keys (key_id, device_id, data) VALUES (?, ?, ?)
             ON CONFLICT(key_id, device_id) DO UPDATE SET data = excluded.data",
        )
        .bind(key_id)
        .bind(self.device_id)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_version(&self, name: &str) -> Result<HashState> {
        let row =
            sqlx::query("SELECT data FROM auth_app_state_versions WHERE name = ? AND device_id = ?")
                .bind(name)
                .bind(self.device_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match row {
            Some(r) => {
                let json: String = r.get("data");
                serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(HashState::default()),
        }
    }

    async fn set_version(&self, name: &str, state: HashState) -> Result<()> {
        let json =
            serde_json::to_string(&state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO auth_app_state_versions (name, device_id, data) VALUES (?, ?, ?)
             ON CONFLICT(name, device_id) DO UPDATE SET data = excluded.data",
        )
        .bind(name)
        .bind(self.device_id)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        for m in mutations {
            sqlx::query(
                "INSERT INTO auth_app_state_mutation_macs
                    (name, version, index_mac, value_mac, device_id)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(version as i64)
            .bind(&m.index_mac)
            .bind(&m.value_mac)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(
            "SELECT value_mac FROM auth_app_state_mutation_macs
             WHERE name = ? AND index_mac = ? AND device_id = ?",
        )
        .bind(name)
        .bind(index_mac)
        .bind(self.device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| r.get("value_mac")))
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> Result<()> {
        for mac in index_macs {
            sqlx::query(
                "DELETE FROM auth_app_state_mutation_macs
                 WHERE name = ? AND index_mac = ? AND device_id = ?",
            )
            .bind(name)
            .bind(mac.as_slice())
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }
}

// ─── ProtocolStore ─────────────────────────────────────────────────────────

#[async_trait]
impl ProtocolStore for SessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT device_jid FROM auth_skdm_recipients WHERE group_jid = ? AND device_id = ?",
        )
        .bind(group_jid)
        .bind(self.device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.get("device_jid")).collect())
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[String]) -> Result<()> {
        for jid in device_jids {
            sqlx::query(
                "INSERT OR IGNORE INTO auth_skdm_recipients (group_jid, device_jid, device_id)
                 VALUES (?, ?, ?)",
            )
            .bind(group_jid)
            .bind(jid)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_skdm_recipients WHERE group_jid = ? AND device_id = ?")
            .bind(group_jid)
            .bind(self.device_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_lid_mapping(&self, lid: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM auth_lid_pn_mapping WHERE lid = ? AND device_id = ?",
        )
        .bind(lid)
        .bind(self.device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry_from_row))
    }

    async fn get_pn_mapping(&self, phone: &str) -> Result<Option<LidPnMappingEntry>> {
        let row = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM auth_lid_pn_mapping WHERE phone_number = ? AND device_id = ?",
        )
        .bind(phone)
        .bind(self.device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(lid_entry_from_row))
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_lid_pn_mapping
                (lid, phone_number, created_at, updated_at, learning_source, device_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(lid, device_id) DO UPDATE SET
                phone_number = excluded.phone_number,
                updated_at = excluded.updated_at,
                learning_source = excluded.learning_source",
        )
        .bind(&entry.lid)
        .bind(&entry.phone_number)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&entry.learning_source)
        .bind(self.device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_all_lid_mappings(&self) -> Result<Vec<LidPnMappingEntry>> {
        let rows = sqlx::query(
            "SELECT lid, phone_number, created_at, updated_at, learning_source
             FROM auth_lid_pn_mapping WHERE device_id = ?",
        )
        .bind(self.device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(lid_entry_from_row).collect())
    }

    async fn save_base_key(&self, address: &str, message_id: &str, base_key: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO auth_base_keys (address, message_id, base_key, device_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(address, message_id, device_id) DO UPDATE SET
                base_key = excluded.base_key",
        )
        .bind(address)
        .bind(message_id)
        .bind(base_key)
        .bind(self.device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT base_key FROM auth_base_keys
             WHERE address = ? AND message_id = ? AND device_id = ?",
        )
        .bind(address)
        .bind(message_id)
        .bind(self.device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row
            .map(|r| r.get::<Vec<u8>, _>("base_key") == current_base_key)
            .unwrap_or(false))
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM auth_base_keys WHERE address = ? AND message_id = ? AND device_id = ?",
        )
        .bind(address)
        .bind(message_id)
        .bind(self.device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> Result<()> {
        let json =
            serde_json::to_string(&record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO auth_device_registry (user, device_id, data) VALUES (?, ?, ?)
             ON CONFLICT(user, device_id) DO UPDATE SET data = excluded.data",
        )
        .bind(&record.user)
        .bind(self.device_id)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_devices(&self, user: &str) -> Result<Option<DeviceListRecord>> {
        let row = sqlx::query("SELECT data FROM auth_device_registry WHERE user = ? AND device_id = ?")
            .bind(user)
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => {
                let json: String = r.get("data");
                let record = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn mark_forget_sender_key(&self, group_jid: &str, participant: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO auth_sender_key_forget (group_jid, participant, device_id)
             VALUES (?, ?, ?)",
        )
        .bind(group_jid)
        .bind(participant)
        .bind(self.device_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT participant FROM auth_sender_key_forget
             WHERE group_jid = ? AND device_id = ?",
        )
        .bind(group_jid)
        .bind(self.device_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let participants: Vec<String> = rows.into_iter().map(|r| r.get("participant")).collect();

        if !participants.is_empty() {
            sqlx::query("DELETE FROM auth_sender_key_forget WHERE group_jid = ? AND device_id = ?")
                .bind(group_jid)
                .bind(self.device_id)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(participants)
    }
}

fn lid_entry_from_row(r: sqlx::sqlite::SqliteRow) -> LidPnMappingEntry {
    LidPnMappingEntry {
        lid: r.get("lid"),
        phone_number: r.get("phone_number"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
        learning_source: r.get("learning_source"),
    }
}

// ─── DeviceStore ───────────────────────────────────────────────────────────

#[async_trait]
impl DeviceStore for SessionStore {
    async fn save(&self, device: &Device) -> Result<()> {
        let bytes =
            rmp_serde::to_vec(device).map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO auth_device (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(self.device_id)
        .bind(&bytes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT data FROM auth_device WHERE id = ?")
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(r) => {
                let data: Vec<u8> = r.get("data");
                match rmp_serde::from_slice(&data) {
                    Ok(device) => Ok(Some(device)),
                    Err(_) => {
                        // An undecodable record cannot be resumed; drop it so
                        // the client re-pairs cleanly.
                        tracing::warn!("clearing undecodable device record, re-pair required");
                        let _ = sqlx::query("DELETE FROM auth_device WHERE id = ?")
                            .bind(self.device_id)
                            .execute(&self.pool)
                            .await;
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    async fn exists(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM auth_device WHERE id = ?")
            .bind(self.device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn create(&self) -> Result<i32> {
        Ok(self.device_id)
    }
}
