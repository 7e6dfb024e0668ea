use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{Result, UserError};

/// Hash preceding the first entry of every log file.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Security-relevant events recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSucceeded,
    LoginFailed,
    LoginRateLimited,
    UserRegistered,
    RoleChanged,
    UserDeactivated,
    UserReactivated,
    StoreInitialized,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::LoginSucceeded => "login_succeeded",
            AuditEvent::LoginFailed => "login_failed",
            AuditEvent::LoginRateLimited => "login_rate_limited",
            AuditEvent::UserRegistered => "user_registered",
            AuditEvent::RoleChanged => "role_changed",
            AuditEvent::UserDeactivated => "user_deactivated",
            AuditEvent::UserReactivated => "user_reactivated",
            AuditEvent::StoreInitialized => "store_initialized",
        }
    }
}

/// Who did what to whom, and from where.
#[derive(Debug, Clone, Default)]
pub struct AuditRecord {
    /// Acting user id, `None` for anonymous or system
    pub actor: Option<String>,
    /// Email or user id the event is about
    pub subject: Option<String>,
    /// Client origin of the request
    pub origin: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A single line in the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub actor: Option<String>,
    pub subject: Option<String>,
    pub origin: Option<String>,
    pub details: Option<serde_json::Value>,
    /// "success" or "failure"
    pub result: String,
    /// Hash of the previous entry for chain verification
    pub previous_hash: String,
    pub entry_hash: String,
}

impl SecureLogEntry {
    fn new(event: AuditEvent, record: AuditRecord, success: bool, previous_hash: String) -> Self {
        let mut entry = Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            event,
            actor: record.actor,
            subject: record.subject,
            origin: record.origin,
            details: record.details,
            result: if success { "success" } else { "failure" }.to_string(),
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        // Every field except entry_hash
        hasher.update(self.id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.event.as_str().as_bytes());
        for field in [&self.actor, &self.subject, &self.origin] {
            if let Some(value) = field {
                hasher.update(value.as_bytes());
            }
            hasher.update([0u8]);
        }
        if let Some(ref details) = self.details {
            hasher.update(details.to_string().as_bytes());
        }
        hasher.update(self.result.as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.calculate_hash()
    }
}

/// Configuration for the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureLogConfig {
    pub log_path: PathBuf,
    /// Rotate once the file reaches this size (in MB)
    pub max_size_mb: u64,
    /// Number of rotated files to keep
    pub max_rotations: u32,
}

impl Default for SecureLogConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/auth/audit.log"),
            max_size_mb: 100,
            max_rotations: 10,
        }
    }
}

/// Append-only, hash-chained audit log.
///
/// Each rotated file is a self-contained chain starting from [`GENESIS_HASH`].
pub struct SecureLogger {
    config: SecureLogConfig,
    /// Hash of the last written entry. Held for the whole append.
    last_hash: Mutex<String>,
}

impl SecureLogger {
    pub fn new(config: SecureLogConfig) -> Result<Self> {
        if let Some(parent) = config.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let last_hash = if config.log_path.exists() {
            Self::get_last_hash(&config.log_path)?
        } else {
            GENESIS_HASH.to_string()
        };

        Ok(Self {
            config,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.log_path
    }

    /// Append an event. Passwords and tokens must never be part of `record`.
    pub async fn log_event(
        &self,
        event: AuditEvent,
        record: AuditRecord,
        success: bool,
    ) -> Result<()> {
        let mut last_hash = self.last_hash.lock().await;

        if self.rotate_if_needed()? {
            *last_hash = GENESIS_HASH.to_string();
        }

        let entry = SecureLogEntry::new(event, record, success, last_hash.clone());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_path)?;
        let json = serde_json::to_string(&entry)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        *last_hash = entry.entry_hash;

        info!(
            "Audit entry: event={}, subject={}, result={}",
            event.as_str(),
            entry.subject.as_deref().unwrap_or("-"),
            entry.result
        );
        Ok(())
    }

    /// Returns true when the log was rotated.
    fn rotate_if_needed(&self) -> Result<bool> {
        if !self.config.log_path.exists() {
            return Ok(false);
        }

        let size_mb = std::fs::metadata(&self.config.log_path)?.len() / (1024 * 1024);
        if size_mb < self.config.max_size_mb {
            return Ok(false);
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let rotated_path = self
            .config
            .log_path
            .with_extension(format!("{}.log", timestamp));
        std::fs::rename(&self.config.log_path, &rotated_path)?;
        info!("Rotated audit log to: {:?}", rotated_path);

        self.cleanup_old_rotations()?;
        Ok(true)
    }

    fn cleanup_old_rotations(&self) -> Result<()> {
        let Some(parent) = self.config.log_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = self.config.log_path.file_stem().and_then(|s| s.to_str()) else {
            return Ok(());
        };
        let current = self.config.log_path.file_name();

        let mut rotated: Vec<_> = std::fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                Some(name.as_os_str()) != current
                    && name.to_str().is_some_and(|n| n.starts_with(base_name))
            })
            .collect();

        rotated.sort_by_key(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        let excess = rotated.len().saturating_sub(self.config.max_rotations as usize);
        for old in rotated.iter().take(excess) {
            std::fs::remove_file(old.path())?;
            info!("Removed old audit rotation: {:?}", old.path());
        }
        Ok(())
    }

    fn get_last_hash(path: &Path) -> Result<String> {
        let reader = BufReader::new(File::open(path)?);
        let mut last_hash = GENESIS_HASH.to_string();
        for line in reader.lines().map_while(|r| r.ok()) {
            if let Ok(entry) = serde_json::from_str::<SecureLogEntry>(&line) {
                last_hash = entry.entry_hash;
            }
        }
        Ok(last_hash)
    }

    /// Read every entry of the current file.
    pub fn read_entries(&self) -> Result<Vec<SecureLogEntry>> {
        if !self.config.log_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.config.log_path)?);
        let mut entries = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let entry = serde_json::from_str(&line).map_err(|e| {
                UserError::AuditLog(format!("Failed to parse line {}: {}", index + 1, e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Verify every entry hash and every link of the current file.
    pub async fn verify_log_chain(&self) -> Result<bool> {
        let _guard = self.last_hash.lock().await;
        let entries = self.read_entries()?;

        let mut expected_previous = GENESIS_HASH.to_string();
        for (index, entry) in entries.iter().enumerate() {
            if !entry.verify_hash() {
                error!(
                    "Audit hash verification failed at line {}: entry_id={}",
                    index + 1,
                    entry.id
                );
                return Ok(false);
            }
            if entry.previous_hash != expected_previous {
                error!(
                    "Audit chain broken at line {}: expected_previous={}, got={}",
                    index + 1,
                    expected_previous,
                    entry.previous_hash
                );
                return Ok(false);
            }
            expected_previous = entry.entry_hash.clone();
        }

        info!("Audit chain verified: {} entries", entries.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn logger_in(dir: &TempDir) -> SecureLogger {
        SecureLogger::new(SecureLogConfig {
            log_path: dir.path().join("audit.log"),
            max_size_mb: 10,
            max_rotations: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_entry_hash() {
        let record = AuditRecord::new()
            .subject("admin@demo.test")
            .origin("127.0.0.1");
        let entry = SecureLogEntry::new(AuditEvent::LoginSucceeded, record, true, GENESIS_HASH.into());
        assert!(entry.verify_hash());

        let mut tampered = entry.clone();
        tampered.subject = Some("someone@demo.test".to_string());
        assert!(!tampered.verify_hash());
    }

    #[tokio::test]
    async fn test_chain_verification() {
        let dir = TempDir::new().unwrap();
        let logger = logger_in(&dir);

        for i in 0..5 {
            logger
                .log_event(
                    AuditEvent::LoginFailed,
                    AuditRecord::new().subject(format!("user{}@demo.test", i)),
                    false,
                )
                .await
                .unwrap();
        }

        assert!(logger.verify_log_chain().await.unwrap());
        let entries = logger.read_entries().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].entry_hash);
    }

    #[tokio::test]
    async fn test_chain_continues_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let logger = logger_in(&dir);
            logger
                .log_event(AuditEvent::StoreInitialized, AuditRecord::new(), true)
                .await
                .unwrap();
        }

        let logger = logger_in(&dir);
        logger
            .log_event(
                AuditEvent::UserRegistered,
                AuditRecord::new().subject("reader@demo.test"),
                true,
            )
            .await
            .unwrap();

        assert!(logger.verify_log_chain().await.unwrap());
    }

    #[tokio::test]
    async fn test_tampering_is_detected() {
        let dir = TempDir::new().unwrap();
        let logger = logger_in(&dir);
        for event in [AuditEvent::LoginSucceeded, AuditEvent::RoleChanged] {
            logger
                .log_event(event, AuditRecord::new().subject("x@demo.test"), true)
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(logger.path()).unwrap();
        std::fs::write(
            logger.path(),
            contents.replacen("role_changed", "user_deactivated", 1),
        )
        .unwrap();

        assert!(!logger.verify_log_chain().await.unwrap());
    }
}
