//! Persistent revocation list.
//!
//! Stores SHA-256 digests of revoked tokens, never the tokens themselves.
//! The digest set lives in memory behind a mutex for O(1) checks and is
//! written through to a sled tree so revocations survive restarts.

use std::collections::HashSet;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA-256 digest of a token string.
pub type TokenDigest = [u8; 32];

/// Computes the revocation digest of a token.
#[must_use]
pub fn token_digest(token: &str) -> TokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Revoked-token digests, memory-resident with sled write-through.
pub struct RevocationList {
    tree: sled::Tree,
    digests: Mutex<HashSet<TokenDigest>>,
}

impl RevocationList {
    /// Opens a revocation list over an existing tree, loading all digests.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the tree cannot be read.
    pub fn open(tree: sled::Tree) -> Result<Self> {
        let mut digests = HashSet::new();
        for item in tree.iter() {
            let (key, _) = item?;
            if let Ok(digest) = TokenDigest::try_from(key.as_ref()) {
                digests.insert(digest);
            }
        }

        Ok(Self {
            tree,
            digests: Mutex::new(digests),
        })
    }

    /// Creates an in-memory list for testing.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the temporary database cannot be created.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(db.open_tree("revocations")?)
    }

    /// Adds a digest. Returns `false` if it was already present.
    ///
    /// The in-memory set is updated before the write-through, so a store
    /// failure still leaves the token revoked for this process.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if persisting fails.
    pub fn insert(&self, digest: TokenDigest) -> Result<bool> {
        let added = self.digests.lock().insert(digest);
        if added {
            let revoked_at = chrono::Utc::now().timestamp_millis().to_be_bytes();
            self.tree.insert(digest, &revoked_at[..])?;
        }
        Ok(added)
    }

    /// Returns true if the digest has been revoked.
    #[must_use]
    pub fn contains(&self, digest: &TokenDigest) -> bool {
        self.digests.lock().contains(digest)
    }

    /// Number of revoked digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.digests.lock().len()
    }

    /// Returns true if nothing has been revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes pending writes to disk.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Store` if the flush fails.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for RevocationList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationList")
            .field("revoked", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let list = RevocationList::temporary().unwrap();
        let digest = token_digest("abc");

        assert!(!list.contains(&digest));
        assert!(list.insert(digest).unwrap());
        assert!(list.contains(&digest));
        assert!(!list.insert(digest).unwrap());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_digest_is_stable_and_distinct() {
        assert_eq!(token_digest("t1"), token_digest("t1"));
        assert_ne!(token_digest("t1"), token_digest("t2"));
    }

    #[test]
    fn test_reload_from_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let digest = token_digest("persisted");

        {
            let db = sled::open(&path).unwrap();
            let list = RevocationList::open(db.open_tree("revocations").unwrap()).unwrap();
            list.insert(digest).unwrap();
            list.flush().unwrap();
        }

        let db = sled::open(&path).unwrap();
        let list = RevocationList::open(db.open_tree("revocations").unwrap()).unwrap();
        assert!(list.contains(&digest));
    }
}
