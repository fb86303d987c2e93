//! In-progress registry (C2)
//!
//! Prevents two workers from dispatching a batch for the same
//! `(source, destination)` pair concurrently. Process-local only: a
//! restart clears every mark, which is fine because nothing this registry
//! protects is meant to survive a crash on its own (the journal and the
//! catalog tables are what make recovery correct).

use std::collections::HashSet;
use std::sync::Mutex;

/// Builds the in-progress key for a `(source, destination)` pair.
pub fn in_progress_key(source_id: &str, destination_id: &str) -> String {
    format!("{}_{}", source_id, destination_id)
}

#[derive(Default)]
pub struct InProgressRegistry {
    marked: Mutex<HashSet<String>>,
}

impl InProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key is already marked in-progress.
    pub fn test(&self, key: &str) -> bool {
        self.marked.lock().unwrap_or_else(|e| e.into_inner()).contains(key)
    }

    /// Marks a key in-progress.
    pub fn mark(&self, key: &str) {
        self.marked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    /// Clears a key's in-progress mark.
    pub fn clear(&self, key: &str) {
        self.marked.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
    }

    /// Atomically tests-and-marks a key in one critical section, returning
    /// `true` if the key was free and is now marked by this call.
    pub fn try_mark(&self, key: &str) -> bool {
        let mut guard = self.marked.lock().unwrap_or_else(|e| e.into_inner());
        if guard.contains(key) {
            false
        } else {
            guard.insert(key.to_string());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_key_format() {
        assert_eq!(in_progress_key("src1", "dest1"), "src1_dest1");
    }

    #[test]
    fn test_try_mark_is_exclusive() {
        let registry = InProgressRegistry::new();
        assert!(registry.try_mark("src1_dest1"));
        assert!(!registry.try_mark("src1_dest1"));
        registry.clear("src1_dest1");
        assert!(registry.try_mark("src1_dest1"));
    }

    #[test]
    fn test_test_and_clear() {
        let registry = InProgressRegistry::new();
        assert!(!registry.test("src2_dest2"));
        registry.mark("src2_dest2");
        assert!(registry.test("src2_dest2"));
        registry.clear("src2_dest2");
        assert!(!registry.test("src2_dest2"));
    }
}
