use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::time::{Duration, Instant};

use super::error::PollError;
use super::payload::{self, AnalysisPayload, CurrentlyPlaying, FeaturesPayload};
use crate::analysis::features::{AudioFeatures, PlaybackSnapshot, TrackAnalysis};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipDirection {
    Next,
    Previous,
    /// Track changed on the remote player without a local request.
    External,
}

impl std::str::FromStr for SkipDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "previous" | "prev" => Ok(Self::Previous),
            other => Err(format!("unknown skip direction '{}'", other)),
        }
    }
}

/// Requests the session makes against the audio service. Each call is
/// independent; the caller checks that a response still matches the current
/// track before applying it.
pub trait PlaybackSource {
    fn poll(&mut self) -> Result<PlaybackSnapshot, PollError>;
    fn fetch_features(&mut self, track_id: &str) -> Result<AudioFeatures, PollError>;
    fn fetch_analysis(&mut self, track_id: &str) -> Result<TrackAnalysis, PollError>;
    fn skip(&mut self, direction: SkipDirection) -> Result<(), PollError>;
}

/// Blocking client for the Spotify Web API.
pub struct SpotifyPoller {
    client: Client,
    base_url: String,
    token: String,
}

impl SpotifyPoller {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self, PollError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, path: &str) -> Result<Response, PollError> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("GET {}", url);
        let resp = self.client.get(&url).bearer_auth(&self.token).send()?;
        check_status(resp)
    }
}

fn check_status(resp: Response) -> Result<Response, PollError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED => PollError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => PollError::RateLimited {
            retry_after_secs: resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok()),
        },
        other => PollError::Status(other.as_u16()),
    })
}

impl PlaybackSource for SpotifyPoller {
    fn poll(&mut self) -> Result<PlaybackSnapshot, PollError> {
        let sent = Instant::now();
        let resp = self.get("/me/player/currently-playing")?;
        // The remote position was read somewhere inside the round trip;
        // the midpoint halves the worst-case error.
        let sampled_at = sent + sent.elapsed() / 2;

        if resp.status() == StatusCode::NO_CONTENT {
            return Err(PollError::NothingPlaying);
        }
        let body = resp.text()?;
        if body.trim().is_empty() {
            return Err(PollError::NothingPlaying);
        }
        let parsed: CurrentlyPlaying = serde_json::from_str(&body)?;
        payload::normalize_playback(parsed, sampled_at)
    }

    fn fetch_features(&mut self, track_id: &str) -> Result<AudioFeatures, PollError> {
        let body = self.get(&format!("/audio-features/{}", track_id))?.text()?;
        let parsed: FeaturesPayload = serde_json::from_str(&body)?;
        payload::normalize_features(parsed, track_id)
    }

    fn fetch_analysis(&mut self, track_id: &str) -> Result<TrackAnalysis, PollError> {
        let body = self.get(&format!("/audio-analysis/{}", track_id))?.text()?;
        let parsed: AnalysisPayload = serde_json::from_str(&body)?;
        let analysis = payload::normalize_analysis(parsed, track_id)?;
        log::debug!(
            "Analysis for {}: {} segments, key {:?}",
            track_id,
            analysis.segments.len(),
            analysis.key
        );
        Ok(analysis)
    }

    fn skip(&mut self, direction: SkipDirection) -> Result<(), PollError> {
        let path = match direction {
            SkipDirection::Next => "/me/player/next",
            SkipDirection::Previous => "/me/player/previous",
            SkipDirection::External => return Ok(()),
        };
        let url = format!("{}{}", self.base_url, path);
        log::debug!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()?;
        check_status(resp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_direction_parses() {
        assert_eq!("next".parse::<SkipDirection>(), Ok(SkipDirection::Next));
        assert_eq!("prev".parse::<SkipDirection>(), Ok(SkipDirection::Previous));
        assert!("sideways".parse::<SkipDirection>().is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let poller =
            SpotifyPoller::new("https://api.example.com/v1/", "t".into(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(poller.base_url, "https://api.example.com/v1");
    }
}
