use thiserror::Error;

/// Any failure talking to the audio service. The session keeps its cached
/// state on every variant and retries on the next poll.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("access token rejected or expired")]
    Unauthorized,
    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("no active playback")]
    NothingPlaying,
}
