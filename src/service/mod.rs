pub mod error;
pub mod payload;
pub mod poller;

pub use error::PollError;
pub use poller::{PlaybackSource, SkipDirection, SpotifyPoller};
