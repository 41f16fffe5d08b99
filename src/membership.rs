//! Who else is in the room, and which of them we are talking to

use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Change of the bound remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    RemotePresent { id: String, display_name: String },
    RemoteAbsent { id: String },
}

/// Other occupants of the room and the one bound as the remote peer.
///
/// The local participant is never an occupant.
#[derive(Debug, Default)]
pub struct RoomMembership {
    occupants: BTreeMap<String, String>,
    remote: Option<String>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_joined(&mut self, id: &str, display_name: &str) -> Option<Presence> {
        if self
            .occupants
            .insert(id.to_owned(), display_name.to_owned())
            .is_some()
        {
            debug!("{} announced again", id);
        }
        match &self.remote {
            None => self.bind(id),
            Some(bound) if bound != id => {
                warn!("{} joined while {} is the remote peer", id, bound);
                None
            }
            Some(_) => None,
        }
    }

    pub fn on_left(&mut self, id: &str) -> Option<Presence> {
        if self.occupants.remove(id).is_none() {
            debug!("{} left but was not known", id);
        }
        if self.remote.as_deref() == Some(id) {
            self.remote = None;
            return Some(Presence::RemoteAbsent { id: id.to_owned() });
        }
        None
    }

    /// An incoming call makes the caller our remote if nobody is bound yet
    pub fn bind_caller(&mut self, id: &str) -> Option<Presence> {
        self.occupants.entry(id.to_owned()).or_default();
        if self.remote.is_none() {
            return self.bind(id);
        }
        None
    }

    pub fn unbind(&mut self) -> Option<String> {
        self.remote.take()
    }

    /// Binds the first remaining occupant after the previous call ended
    pub fn rebind(&mut self) -> Option<Presence> {
        if self.remote.is_some() {
            return None;
        }
        let id = self.occupants.keys().next()?.clone();
        self.bind(&id)
    }

    pub fn reset(&mut self) {
        self.occupants.clear();
        self.remote = None;
    }

    fn bind(&mut self, id: &str) -> Option<Presence> {
        self.remote = Some(id.to_owned());
        Some(Presence::RemotePresent {
            id: id.to_owned(),
            display_name: self.display_name(id).unwrap_or_default().to_owned(),
        })
    }

    pub fn occupancy(&self) -> usize {
        self.occupants.len()
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.occupants.get(id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_joiner_is_bound() {
        let mut room = RoomMembership::new();
        assert_eq!(
            room.on_joined("b", "bob"),
            Some(Presence::RemotePresent {
                id: "b".into(),
                display_name: "bob".into()
            })
        );
        assert_eq!(room.on_joined("c", "carol"), None);
        assert_eq!(room.on_joined("b", "bob"), None);
        assert_eq!(room.occupancy(), 2);
        assert_eq!(room.remote(), Some("b"));
    }

    #[test]
    fn test_leave_never_goes_negative() {
        let mut room = RoomMembership::new();
        assert_eq!(room.on_left("ghost"), None);
        assert_eq!(room.occupancy(), 0);

        room.on_joined("b", "bob");
        assert_eq!(
            room.on_left("b"),
            Some(Presence::RemoteAbsent { id: "b".into() })
        );
        assert_eq!(room.remote(), None);
        assert_eq!(room.on_left("b"), None);
        assert_eq!(room.occupancy(), 0);
    }

    #[test]
    fn test_caller_binding_and_rebind() {
        let mut room = RoomMembership::new();
        assert!(room.bind_caller("a").is_some());
        assert_eq!(room.occupancy(), 1);
        assert!(room.bind_caller("z").is_none());

        assert_eq!(room.unbind().as_deref(), Some("a"));
        assert!(matches!(
            room.rebind(),
            Some(Presence::RemotePresent { id, .. }) if id == "a"
        ));
        room.reset();
        assert_eq!(room.rebind(), None);
    }
}
