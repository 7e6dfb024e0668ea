//! Client-side session cache.
//!
//! A persisted, optimistic copy of "who am I" used to decide what to render
//! (for example whether to show the admin menu). Anything stored here can be
//! edited by the user, so it never authorizes anything: every destination it
//! links to is guarded again on the server.

pub mod error;

use chrono::{DateTime, Utc};
use error::Result;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use authz::Role;

const SESSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("client_session");

const ENTRY_KEY: &str = "current";
const TOKEN_KEY: &str = "token";

/// Identity as last reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIdentity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
}

/// `{identity, is_authenticated}` as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCacheEntry {
    pub identity: Option<CachedIdentity>,
    pub is_authenticated: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClientCacheEntry {
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            is_authenticated: false,
            updated_at: None,
        }
    }

    fn authenticated(identity: CachedIdentity) -> Self {
        Self {
            identity: Some(identity),
            is_authenticated: true,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match (&self.identity, self.is_authenticated) {
            (Some(identity), true) => Some(identity.role),
            _ => None,
        }
    }
}

/// What [`ClientSessionCache::reconcile`] changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Unchanged,
    Updated,
    Cleared,
}

/// Persisted client session state backed by redb. All operations are
/// synchronous.
pub struct ClientSessionCache {
    db: Database,
    path: PathBuf,
}

impl ClientSessionCache {
    pub fn open(cache_path: impl AsRef<Path>) -> Result<Self> {
        let path = cache_path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!("Opening client session cache at: {:?}", path);
        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSION_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mirror a successful server login.
    pub fn login(&self, identity: CachedIdentity) -> Result<()> {
        info!("Caching session for {} ({})", identity.email, identity.role);
        self.write_entry(&ClientCacheEntry::authenticated(identity))
    }

    /// Forget the cached identity and any stored token.
    pub fn logout(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            table.remove(ENTRY_KEY)?;
            table.remove(TOKEN_KEY)?;
        }
        write_txn.commit()?;
        info!("Cleared cached session");
        Ok(())
    }

    /// The cached entry, anonymous when nothing usable is stored.
    pub fn current(&self) -> Result<ClientCacheEntry> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSION_TABLE)?;

        let Some(bytes) = table.get(ENTRY_KEY)? else {
            return Ok(ClientCacheEntry::anonymous());
        };

        // A corrupted or hand-edited entry reads as logged out
        match serde_json::from_slice(bytes.value()) {
            Ok(entry) => Ok(entry),
            Err(e) => {
                warn!("Discarding unreadable client session entry: {}", e);
                Ok(ClientCacheEntry::anonymous())
            }
        }
    }

    /// Whether the UI should offer features gated on `required`.
    ///
    /// Advisory only. Storage failures read as "no".
    pub fn has_permission(&self, required: Role) -> bool {
        match self.current() {
            Ok(entry) => entry
                .role()
                .is_some_and(|role| authz::satisfies(role, required)),
            Err(e) => {
                warn!("Client session cache unreadable: {}", e);
                false
            }
        }
    }

    /// Replace the cached copy with what the server resolved. `None` means the
    /// server sees no session, so the cache is cleared.
    pub fn reconcile(&self, server_view: Option<CachedIdentity>) -> Result<Reconciliation> {
        let current = self.current()?;
        match server_view {
            None if current.is_authenticated || current.identity.is_some() => {
                self.logout()?;
                Ok(Reconciliation::Cleared)
            }
            None => Ok(Reconciliation::Unchanged),
            Some(identity)
                if current.is_authenticated && current.identity.as_ref() == Some(&identity) =>
            {
                Ok(Reconciliation::Unchanged)
            }
            Some(identity) => {
                debug!("Client session diverged from server, updating");
                self.write_entry(&ClientCacheEntry::authenticated(identity))?;
                Ok(Reconciliation::Updated)
            }
        }
    }

    /// Keep the bearer token a non-browser client presents on later requests.
    pub fn store_token(&self, token: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            table.insert(TOKEN_KEY, token.as_bytes())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSION_TABLE)?;
        let token = table
            .get(TOKEN_KEY)?
            .and_then(|bytes| String::from_utf8(bytes.value().to_vec()).ok());
        Ok(token)
    }

    fn write_entry(&self, entry: &ClientCacheEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            table.insert(ENTRY_KEY, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    #[cfg(test)]
    fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            table.insert(ENTRY_KEY, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity(role: Role) -> CachedIdentity {
        CachedIdentity {
            id: "01HZX".to_string(),
            email: "someone@demo.test".to_string(),
            display_name: "Someone".to_string(),
            role,
        }
    }

    fn open(dir: &TempDir) -> ClientSessionCache {
        ClientSessionCache::open(dir.path().join("session.redb")).unwrap()
    }

    #[test]
    fn test_starts_anonymous() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert_eq!(cache.current().unwrap(), ClientCacheEntry::anonymous());
        assert!(!cache.has_permission(Role::Reader));
    }

    #[test]
    fn test_login_logout() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.login(identity(Role::Author)).unwrap();
        let entry = cache.current().unwrap();
        assert!(entry.is_authenticated);
        assert_eq!(entry.identity, Some(identity(Role::Author)));

        assert!(cache.has_permission(Role::Reader));
        assert!(cache.has_permission(Role::Author));
        assert!(!cache.has_permission(Role::Admin));

        cache.store_token("tok.sig").unwrap();
        cache.logout().unwrap();
        assert!(!cache.current().unwrap().is_authenticated);
        assert!(cache.token().unwrap().is_none());
        assert!(!cache.has_permission(Role::Reader));
    }

    #[test]
    fn test_admin_sees_everything() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.login(identity(Role::Admin)).unwrap();
        for role in Role::ALL {
            assert!(cache.has_permission(role));
        }
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir);
            cache.login(identity(Role::Reader)).unwrap();
            cache.store_token("tok.sig").unwrap();
        }
        let cache = open(&dir);
        assert_eq!(cache.current().unwrap().role(), Some(Role::Reader));
        assert_eq!(cache.token().unwrap().as_deref(), Some("tok.sig"));
    }

    #[test]
    fn test_reconcile() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert_eq!(cache.reconcile(None).unwrap(), Reconciliation::Unchanged);

        cache.login(identity(Role::Admin)).unwrap();
        assert_eq!(
            cache.reconcile(Some(identity(Role::Admin))).unwrap(),
            Reconciliation::Unchanged
        );

        // Server says the role is lower than the client believed
        assert_eq!(
            cache.reconcile(Some(identity(Role::Reader))).unwrap(),
            Reconciliation::Updated
        );
        assert!(!cache.has_permission(Role::Admin));

        assert_eq!(cache.reconcile(None).unwrap(), Reconciliation::Cleared);
        assert!(!cache.current().unwrap().is_authenticated);
    }

    #[test]
    fn test_tampered_entry_reads_as_anonymous() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.write_raw(b"{\"identity\": \"admin\"").unwrap();
        assert_eq!(cache.current().unwrap(), ClientCacheEntry::anonymous());
        assert!(!cache.has_permission(Role::Reader));
    }
}
