//! Replay protection for attested settlements.
//!
//! The token contract tracks nonces for `transferWithAuthorization`, but an
//! attested settlement moves the facilitator's own funds and the payer's nonce
//! never reaches the contract. These stores remember which `(payer, nonce)`
//! pairs have been settled that way.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use alloy::primitives::{keccak256, Address, FixedBytes, B256};
use dashmap::DashMap;

/// Key for a `(payer, nonce)` pair: `keccak256(payer ‖ nonce)`.
pub fn replay_key(payer: Address, nonce: &FixedBytes<32>) -> B256 {
    let mut buf = [0u8; 52];
    buf[..20].copy_from_slice(payer.as_slice());
    buf[20..].copy_from_slice(nonce.as_slice());
    keccak256(buf)
}

/// Storage backend for claimed replay keys. Must be thread-safe.
pub trait NonceStore: Send + Sync {
    fn is_claimed(&self, key: &B256) -> bool;

    /// Atomically claim `key`. Returns `false` if it was already claimed.
    fn try_claim(&self, key: B256) -> bool;

    /// Give back a claim, for failures known to have left the chain untouched.
    fn release(&self, key: &B256);

    /// Drop claims older than `max_age_secs`. Returns the number dropped.
    fn purge_expired(&self, max_age_secs: u64) -> usize;
}

/// In-memory store backed by DashMap. Lost on restart.
#[derive(Default)]
pub struct InMemoryNonceStore {
    claims: DashMap<B256, Instant>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn is_claimed(&self, key: &B256) -> bool {
        self.claims.contains_key(key)
    }

    fn try_claim(&self, key: B256) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.claims.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Instant::now());
                true
            }
        }
    }

    fn release(&self, key: &B256) {
        self.claims.remove(key);
    }

    fn purge_expired(&self, max_age_secs: u64) -> usize {
        let before = self.claims.len();
        self.claims
            .retain(|_, claimed_at| claimed_at.elapsed().as_secs() < max_age_secs);
        before.saturating_sub(self.claims.len())
    }
}

/// SQLite-backed store. Survives restarts and is shared by processes using the same file.
pub struct SqliteNonceStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteNonceStore {
    /// Open (or create) the database at `path`. On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attested_claims (
                claim_key BLOB PRIMARY KEY,
                claimed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_claims_claimed_at ON attested_claims(claimed_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!(path = %path, error = %e, "failed to restrict replay store permissions");
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::error!("replay store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Current unix time. On clock error returns i64::MAX so nothing is purged early.
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_else(|_| {
            tracing::error!("system clock before UNIX epoch, keeping replay claims");
            i64::MAX
        })
}

impl NonceStore for SqliteNonceStore {
    fn is_claimed(&self, key: &B256) -> bool {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM attested_claims WHERE claim_key = ?1",
                [key.as_slice()],
                |row| row.get::<_, i64>(0),
            )
            // A read error counts as claimed.
            .map_or(true, |count| count > 0)
    }

    fn try_claim(&self, key: B256) -> bool {
        // The primary key makes this atomic, also across processes.
        self.conn()
            .execute(
                "INSERT INTO attested_claims (claim_key, claimed_at) VALUES (?1, ?2)",
                rusqlite::params![key.as_slice(), unix_now()],
            )
            .is_ok()
    }

    fn release(&self, key: &B256) {
        if let Err(e) = self.conn().execute(
            "DELETE FROM attested_claims WHERE claim_key = ?1",
            rusqlite::params![key.as_slice()],
        ) {
            tracing::error!(error = %e, "failed to release replay claim; it stays consumed");
        }
    }

    fn purge_expired(&self, max_age_secs: u64) -> usize {
        let conn = self.conn();
        let now = unix_now();

        // A backward clock jump would make fresh claims look old; skip.
        let newest: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(claimed_at), 0) FROM attested_claims",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if newest > now {
            tracing::warn!(now, newest, "clock is behind newest replay claim, skipping purge");
            return 0;
        }

        let cutoff = now.saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        conn.execute(
            "DELETE FROM attested_claims WHERE claimed_at < ?1",
            rusqlite::params![cutoff],
        )
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite() -> (tempfile::TempDir, SqliteNonceStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");
        let store = SqliteNonceStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn replay_key_binds_payer_and_nonce() {
        let nonce = FixedBytes::repeat_byte(0x42);
        let a = replay_key(Address::repeat_byte(1), &nonce);
        assert_eq!(a, replay_key(Address::repeat_byte(1), &nonce));
        assert_ne!(a, replay_key(Address::repeat_byte(2), &nonce));
        assert_ne!(a, replay_key(Address::repeat_byte(1), &FixedBytes::repeat_byte(0x43)));
    }

    #[test]
    fn in_memory_claim_is_exclusive_until_released() {
        let store = InMemoryNonceStore::new();
        let key = B256::repeat_byte(0x99);

        assert!(store.try_claim(key));
        assert!(!store.try_claim(key));
        assert!(store.is_claimed(&key));

        store.release(&key);
        assert!(!store.is_claimed(&key));
        assert!(store.try_claim(key));
    }

    #[test]
    fn sqlite_claim_is_exclusive_until_released() {
        let (_dir, store) = sqlite();
        let key = B256::repeat_byte(0x99);

        assert!(store.try_claim(key));
        assert!(!store.try_claim(key));
        store.release(&key);
        assert!(store.try_claim(key));
    }

    #[test]
    fn sqlite_claims_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.db");
        let key = B256::repeat_byte(0xaa);

        {
            let store = SqliteNonceStore::open(path.to_str().unwrap()).unwrap();
            assert!(store.try_claim(key));
        }
        let store = SqliteNonceStore::open(path.to_str().unwrap()).unwrap();
        assert!(store.is_claimed(&key));
        assert!(!store.try_claim(key));
    }

    #[test]
    fn sqlite_purge_drops_old_claims_only() {
        let (_dir, store) = sqlite();
        let old = B256::repeat_byte(0xbb);
        let fresh = B256::repeat_byte(0xcc);
        store
            .conn()
            .execute(
                "INSERT INTO attested_claims (claim_key, claimed_at) VALUES (?1, ?2)",
                rusqlite::params![old.as_slice(), 1000i64],
            )
            .unwrap();
        assert!(store.try_claim(fresh));

        assert_eq!(store.purge_expired(60), 1);
        assert!(!store.is_claimed(&old));
        assert!(store.is_claimed(&fresh));
    }

    #[test]
    fn in_memory_purge_with_zero_age_empties_the_store() {
        let store = InMemoryNonceStore::new();
        store.try_claim(B256::repeat_byte(1));
        store.try_claim(B256::repeat_byte(2));
        assert_eq!(store.purge_expired(0), 2);
    }
}
