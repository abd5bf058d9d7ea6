use std::{collections::HashSet, sync::Mutex};

/// In-memory admission gate for notification deliveries.
///
/// Entries are never evicted: the set grows by one identity per unique delivery
/// for the life of the process, which is acceptable for a single low-traffic
/// channel. [`NotificationDeduplicator::len`] exposes the size for monitoring.
#[derive(Debug, Default)]
pub struct NotificationDeduplicator {
    seen: Mutex<HashSet<String>>,
}

impl NotificationDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the identity of a delivery: the delivery id followed by its signature.
    pub fn identity(delivery_id: &str, signature: &str) -> String {
        let mut identity = String::with_capacity(delivery_id.len() + signature.len());
        identity.push_str(delivery_id);
        identity.push_str(signature);
        identity
    }

    /// Returns `true` the first time `identity` is offered, `false` afterwards.
    pub fn admit(&self, identity: &str) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.contains(identity) {
            return false;
        }
        seen.insert(identity.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
