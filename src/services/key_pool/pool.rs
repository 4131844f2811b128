//! Key Pool Implementation
//!
//! This module provides `KeyPool`, an ordered set of API keys with a cyclic
//! cursor that the rotation executor advances whenever a call fails.

use crate::error::ConfigurationError;
use crate::utils::mask_key;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// ============================================================================
// Key Pool
// ============================================================================

/// An ordered, deduplicated pool of API keys with a cyclic cursor
///
/// Membership is fixed at construction; only the cursor moves. The cursor is
/// atomic so a pool can be shared behind an `Arc`, but concurrent callers
/// rotating the same pool may still skip or repeat keys relative to each
/// other.
pub struct KeyPool {
    /// Distinct keys in first-seen order (never empty)
    keys: Vec<String>,
    /// Index of the current key, always `< keys.len()`
    cursor: AtomicUsize,
    /// Number of `advance` calls since construction
    rotations: AtomicU64,
}

impl KeyPool {
    /// Create a pool from raw key strings
    ///
    /// Entries are trimmed, blank entries dropped and duplicates removed while
    /// keeping first-seen order. Fails if nothing usable remains.
    pub fn new<I, S>(raw_keys: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for raw in raw_keys {
            let key = raw.as_ref().trim();
            if key.is_empty() {
                continue;
            }
            if seen.insert(key.to_string()) {
                keys.push(key.to_string());
            }
        }

        if keys.is_empty() {
            return Err(ConfigurationError::NoKeys(
                "every provided key was empty or blank".to_string(),
            ));
        }

        tracing::debug!(key_count = keys.len(), "Loaded API key pool");

        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
            rotations: AtomicU64::new(0),
        })
    }

    /// Get the key at the cursor
    ///
    /// Before any rotation this is the first key of the pool.
    pub fn current(&self) -> &str {
        &self.keys[self.position()]
    }

    /// Move the cursor to the next key, wrapping after the last one
    ///
    /// Returns the new current key.
    pub fn advance(&self) -> &str {
        let len = self.keys.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pos| Some((pos + 1) % len))
            .unwrap_or_else(|pos| pos);
        let next = (previous + 1) % len;
        self.rotations.fetch_add(1, Ordering::SeqCst);

        let key = &self.keys[next];
        tracing::warn!(
            key = %mask_key(key),
            position = next,
            pool_size = len,
            "Switching to next API key"
        );
        key
    }

    /// Get the number of distinct keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false: construction rejects empty pools
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get all keys in pool order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Get the cursor position
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Get the number of rotations performed so far
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Get pool statistics
    pub fn stats(&self) -> KeyPoolStats {
        KeyPoolStats {
            size: self.len(),
            position: self.position(),
            rotations: self.rotations(),
        }
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: Vec<String> = self.keys.iter().map(|k| mask_key(k)).collect();
        f.debug_struct("KeyPool")
            .field("keys", &masked)
            .field("position", &self.position())
            .field("rotations", &self.rotations())
            .finish()
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Snapshot of a key pool's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPoolStats {
    /// Number of distinct keys
    pub size: usize,
    /// Cursor position
    pub position: usize,
    /// Rotations since construction
    pub rotations: u64,
}

// ============================================================================
// Tests
// ============================================================================
