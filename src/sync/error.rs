use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SyncError {
    #[error("no track loaded")]
    NotLoaded,
    #[error("waiting for a fresh track load after skip")]
    AwaitingReload,
    #[error("cursor is for track '{expected}' but playback reports '{actual}'")]
    TrackMismatch { expected: String, actual: String },
    #[error("discarded response for '{track_id}' (request epoch {epoch}, current {current})")]
    StaleResponse {
        track_id: String,
        epoch: u64,
        current: u64,
    },
    #[error("position {position_sec:.3}s is past the last of {segments} segments")]
    IndexOutOfRange { position_sec: f64, segments: usize },
    #[error("segment list is empty")]
    EmptySegments,
}
