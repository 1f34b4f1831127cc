use serde::Deserialize;
use std::time::Instant;

use super::error::PollError;
use crate::analysis::features::{
    AudioFeatures, PlaybackSnapshot, Segment, SegmentList, TrackAnalysis, PITCH_CLASSES,
};

#[derive(Debug, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub item: Option<TrackItem>,
    #[serde(default)]
    pub currently_playing_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct FeaturesPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub acousticness: Option<f64>,
    pub danceability: Option<f64>,
    pub energy: Option<f64>,
    pub instrumentalness: Option<f64>,
    pub liveness: Option<f64>,
    pub loudness: Option<f64>,
    pub speechiness: Option<f64>,
    pub tempo: Option<f64>,
    pub time_signature: Option<f64>,
    pub valence: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisPayload {
    pub track: AnalysisTrack,
    #[serde(default)]
    pub segments: Vec<SegmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisTrack {
    #[serde(default = "no_key")]
    pub key: i32,
    #[serde(default)]
    pub key_confidence: f64,
    #[serde(default)]
    pub mode: i32,
    #[serde(default)]
    pub tempo: Option<f64>,
}

fn no_key() -> i32 {
    -1
}

#[derive(Debug, Deserialize)]
pub struct SegmentPayload {
    pub start: f64,
    pub duration: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub loudness_max: f64,
    pub pitches: Vec<f64>,
    #[serde(default)]
    pub timbre: Vec<f64>,
}

/// Turn a currently-playing body into a snapshot stamped at `sampled_at`.
/// Ads, podcasts and local files without an id count as nothing playing.
pub fn normalize_playback(
    body: CurrentlyPlaying,
    sampled_at: Instant,
) -> Result<PlaybackSnapshot, PollError> {
    if let Some(kind) = body.currently_playing_type.as_deref() {
        if kind != "track" {
            return Err(PollError::NothingPlaying);
        }
    }
    let item = body.item.ok_or(PollError::NothingPlaying)?;
    let track_id = item.id.filter(|id| !id.is_empty()).ok_or(PollError::NothingPlaying)?;

    let progress_ms = body.progress_ms.unwrap_or(0);
    Ok(PlaybackSnapshot {
        track_id,
        track_name: item.name,
        artists: item.artists.into_iter().map(|a| a.name).collect(),
        progress_ms: if item.duration_ms > 0 {
            progress_ms.min(item.duration_ms)
        } else {
            progress_ms
        },
        duration_ms: item.duration_ms,
        is_playing: body.is_playing,
        sampled_at,
    })
}

/// Missing descriptors become NaN so the mappers fall back to their
/// documented defaults instead of inventing a mood.
pub fn normalize_features(
    body: FeaturesPayload,
    requested: &str,
) -> Result<AudioFeatures, PollError> {
    if let Some(ref id) = body.id {
        if id != requested {
            return Err(PollError::Malformed(format!(
                "features for '{}' returned for '{}'",
                id, requested
            )));
        }
    }
    let v = |x: Option<f64>| x.unwrap_or(f64::NAN);
    Ok(AudioFeatures {
        track_id: requested.to_string(),
        acousticness: v(body.acousticness),
        danceability: v(body.danceability),
        energy: v(body.energy),
        instrumentalness: v(body.instrumentalness),
        liveness: v(body.liveness),
        loudness: v(body.loudness),
        speechiness: v(body.speechiness),
        tempo: v(body.tempo),
        time_signature: v(body.time_signature),
        valence: v(body.valence),
    })
}

pub fn normalize_analysis(
    body: AnalysisPayload,
    requested: &str,
) -> Result<TrackAnalysis, PollError> {
    let mut segments = Vec::with_capacity(body.segments.len());
    for (i, raw) in body.segments.into_iter().enumerate() {
        if raw.pitches.len() != PITCH_CLASSES {
            return Err(PollError::Malformed(format!(
                "segment {} has {} pitch classes",
                i,
                raw.pitches.len()
            )));
        }
        if !raw.start.is_finite() || !raw.duration.is_finite() {
            log::debug!("Dropping segment {} with non-finite timing", i);
            continue;
        }
        let mut pitches = [0.0; PITCH_CLASSES];
        for (dst, src) in pitches.iter_mut().zip(&raw.pitches) {
            *dst = if src.is_finite() { src.clamp(0.0, 1.0) } else { 0.0 };
        }
        segments.push(Segment {
            start_sec: raw.start.max(0.0),
            duration_sec: raw.duration.max(0.0),
            confidence: raw.confidence,
            loudness_max: raw.loudness_max,
            pitches,
            timbre: raw.timbre,
        });
    }

    if segments.is_empty() {
        return Err(PollError::Malformed("analysis contains no segments".into()));
    }

    if segments.windows(2).any(|w| w[0].start_sec > w[1].start_sec) {
        log::warn!("Analysis segments for {} out of order, sorting", requested);
        // Stable, so equal starts keep their list order.
        segments.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));
    }

    let key = u8::try_from(body.track.key).ok().filter(|k| *k < 12);

    Ok(TrackAnalysis {
        segments: SegmentList::new(requested, segments),
        key,
        key_confidence: body.track.key_confidence,
        mode: if body.track.mode == 1 { 1 } else { 0 },
        tempo: body.track.tempo.unwrap_or(f64::NAN),
    })
}
