//! Persisted controller state.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const STATE_KEY: &[u8] = b"state";

/// One recorded test or build outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Component under test.
    pub component: String,
    /// Whether it passed.
    pub passed: bool,
    /// Free-form details (test name, failure summary).
    pub details: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

/// Failure counters, checkpoint and recovery flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackState {
    /// Consecutive failures per component.
    pub failure_counts: BTreeMap<String, u32>,
    /// Last checkpoint at which everything passed.
    pub last_known_good: Option<String>,
    /// Set by an automatic rollback, cleared only by an operator.
    pub in_recovery_mode: bool,
    /// Most recent results, oldest first.
    pub history: VecDeque<TestResult>,
}

impl RollbackState {
    /// Loads state from `tree`, or the default if none was saved.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure or corrupt state.
    pub fn load(tree: &sled::Tree) -> Result<Self> {
        match tree.get(STATE_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Self::default()),
        }
    }

    /// Writes state to `tree` and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub fn save(&self, tree: &sled::Tree) -> Result<()> {
        tree.insert(STATE_KEY, serde_json::to_vec(self)?)?;
        tree.flush()?;
        Ok(())
    }

    /// Appends to history, dropping the oldest entries past `capacity`.
    pub fn push_history(&mut self, result: TestResult, capacity: usize) {
        self.history.push_back(result);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    /// Consecutive failures for `component`.
    #[must_use]
    pub fn failures(&self, component: &str) -> u32 {
        self.failure_counts.get(component).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: usize) -> TestResult {
        TestResult {
            component: format!("c{}", n),
            passed: true,
            details: String::new(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = RollbackState::default();
        for n in 0..5 {
            state.push_history(result(n), 3);
        }
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history.front().unwrap().component, "c2");
    }

    #[test]
    fn test_round_trip_through_tree() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("rollback").unwrap();

        assert_eq!(RollbackState::load(&tree).unwrap(), RollbackState::default());

        let mut state = RollbackState::default();
        state.failure_counts.insert("api".into(), 2);
        state.last_known_good = Some("abc123".into());
        state.save(&tree).unwrap();

        let loaded = RollbackState::load(&tree).unwrap();
        assert_eq!(loaded.failures("api"), 2);
        assert_eq!(loaded.last_known_good.as_deref(), Some("abc123"));
    }
}
