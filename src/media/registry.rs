//! Registry of local tracks currently attached to the transport

use crate::peer::SenderId;
use std::collections::HashMap;
use tracing::debug;

/// Track id → transport sender, for every attached local track.
///
/// A track id is present iff it has been attached and not yet detached.
/// `attach` of a present id and `detach` of an absent id are no-ops.
#[derive(Debug, Default)]
pub struct AttachedTrackRegistry {
    attached: HashMap<String, SenderId>,
}

impl AttachedTrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.attached.contains_key(track_id)
    }

    /// Records an attachment. Returns `false` if the track was already attached.
    pub fn attach(&mut self, track_id: &str, sender: SenderId) -> bool {
        if self.attached.contains_key(track_id) {
            debug!("track {} already attached", track_id);
            return false;
        }
        self.attached.insert(track_id.to_string(), sender);
        true
    }

    /// Forgets an attachment, returning the sender that carried it
    pub fn detach(&mut self, track_id: &str) -> Option<SenderId> {
        self.attached.remove(track_id)
    }

    pub fn sender(&self, track_id: &str) -> Option<SenderId> {
        self.attached.get(track_id).copied()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.attached.len();
        self.attached.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_is_idempotent() {
        let mut reg = AttachedTrackRegistry::new();
        assert!(reg.attach("t1", SenderId(1)));
        assert!(!reg.attach("t1", SenderId(2)));
        assert_eq!(reg.sender("t1"), Some(SenderId(1)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let mut reg = AttachedTrackRegistry::new();
        reg.attach("t1", SenderId(7));
        assert_eq!(reg.detach("t1"), Some(SenderId(7)));
        assert_eq!(reg.detach("t1"), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut reg = AttachedTrackRegistry::new();
        reg.attach("a", SenderId(1));
        reg.attach("b", SenderId(2));
        assert_eq!(reg.clear(), 2);
        assert_eq!(reg.clear(), 0);
    }
}
