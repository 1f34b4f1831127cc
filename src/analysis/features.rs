use std::sync::Arc;
use std::time::Instant;

/// Number of pitch classes in a chroma vector.
pub const PITCH_CLASSES: usize = 12;

/// One poll of the remote player. Superseded wholesale by the next poll.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSnapshot {
    pub track_id: String,
    pub track_name: String,
    pub artists: Vec<String>,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    /// Local time the remote position was sampled at
    pub sampled_at: Instant,
}

impl PlaybackSnapshot {
    /// Remote position in seconds, projected forward to `now` while playing.
    pub fn position_at(&self, now: Instant) -> f64 {
        let base = self.progress_ms as f64 / 1000.0;
        if self.is_playing {
            base + now.saturating_duration_since(self.sampled_at).as_secs_f64()
        } else {
            base
        }
    }

    pub fn display_name(&self) -> String {
        if self.artists.is_empty() {
            self.track_name.clone()
        } else {
            format!("{} - {}", self.artists.join(", "), self.track_name)
        }
    }
}

/// Track-level mood descriptors. Most values are in 0.0-1.0,
/// loudness is in dB and tempo in BPM.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFeatures {
    pub track_id: String,
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub loudness: f64,
    pub speechiness: f64,
    pub tempo: f64,
    pub time_signature: f64,
    pub valence: f64,
}

/// A time-bounded slice of the track's analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub start_sec: f64,
    pub duration_sec: f64,
    pub confidence: f64,
    pub loudness_max: f64,
    pub pitches: [f64; PITCH_CLASSES],
    pub timbre: Vec<f64>,
}

impl Segment {
    pub fn end_sec(&self) -> f64 {
        self.start_sec + self.duration_sec
    }
}

/// Immutable, start-ordered segment list for one track.
///
/// Cloning shares the underlying slice, so replacing a session's list is a
/// pointer swap rather than a field-by-field update.
#[derive(Clone, Debug)]
pub struct SegmentList {
    track_id: String,
    segments: Arc<[Segment]>,
}

impl SegmentList {
    /// Caller guarantees `segments` is sorted by `start_sec`.
    pub fn new(track_id: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            track_id: track_id.into(),
            segments: segments.into(),
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// End of the last segment, in seconds.
    pub fn end_sec(&self) -> f64 {
        self.segments.last().map(Segment::end_sec).unwrap_or(0.0)
    }
}

/// Full analysis response: segments plus the track-level key estimate.
#[derive(Clone, Debug)]
pub struct TrackAnalysis {
    pub segments: SegmentList,
    /// Pitch class of the key, 0 = C. `None` when the service could not detect one.
    pub key: Option<u8>,
    pub key_confidence: f64,
    /// 1 = major, 0 = minor
    pub mode: u8,
    pub tempo: f64,
}

const KEY_NAMES: [&str; PITCH_CLASSES] =
    ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

impl TrackAnalysis {
    /// "D major", "A minor", or "unknown key".
    pub fn key_label(&self) -> String {
        match self.key.and_then(|k| KEY_NAMES.get(k as usize)) {
            Some(name) => {
                let mode = if self.mode == 1 { "major" } else { "minor" };
                format!("{} {}", name, mode)
            }
            None => "unknown key".to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) fn segment(start_sec: f64, duration_sec: f64) -> Segment {
    Segment {
        start_sec,
        duration_sec,
        confidence: 1.0,
        loudness_max: -10.0,
        pitches: [0.5; PITCH_CLASSES],
        timbre: Vec::new(),
    }
}
