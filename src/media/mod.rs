pub mod devices;
pub mod manager;
pub mod registry;
pub mod track;

pub use devices::{MediaConstraints, MediaDevices, SyntheticDevices};
pub use manager::TrackManager;
pub use registry::AttachedTrackRegistry;
pub use track::{LocalTrack, MediaStream, TrackKind};
