//! Config subscriber (C3)
//!
//! Receives destination topology from an external config stream and
//! rebuilds the enabled-bindings list atomically. Readers (the router and
//! warehouse main loops) take a cheap `Arc` snapshot at the start of a
//! scheduling pass and iterate it without re-locking; a config event mid-pass
//! never produces a torn read.

use std::sync::{Arc, RwLock};

use crate::types::DestinationBinding;

pub struct ConfigSubscriber {
    bindings: RwLock<Arc<Vec<DestinationBinding>>>,
}

impl Default for ConfigSubscriber {
    fn default() -> Self {
        Self {
            bindings: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl ConfigSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire enabled-bindings list. Called on each event from
    /// the external config stream.
    pub fn replace(&self, bindings: Vec<DestinationBinding>) {
        let mut guard = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(bindings);
    }

    /// Returns a stable snapshot of the enabled bindings for one scheduling
    /// pass. Cloning the `Arc` is O(1); the underlying `Vec` is shared and
    /// immutable for the snapshot's lifetime even if `replace` runs
    /// concurrently.
    pub fn snapshot(&self) -> Arc<Vec<DestinationBinding>> {
        self.bindings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DestinationType;

    fn binding(source: &str, dest: &str) -> DestinationBinding {
        DestinationBinding {
            source_id: source.to_string(),
            destination_id: dest.to_string(),
            destination_type: DestinationType::S3,
            config: serde_json::json!({}),
        }
    }

    #[test]
    fn test_replace_and_snapshot() {
        let subscriber = ConfigSubscriber::new();
        assert!(subscriber.snapshot().is_empty());

        subscriber.replace(vec![binding("src1", "dest1")]);
        let snap = subscriber.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].source_id, "src1");
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let subscriber = ConfigSubscriber::new();
        subscriber.replace(vec![binding("src1", "dest1")]);
        let snap = subscriber.snapshot();

        subscriber.replace(vec![binding("src2", "dest2")]);

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].source_id, "src1");
        assert_eq!(subscriber.snapshot()[0].source_id, "src2");
    }
}
