use std::sync::Arc;
use std::time::Instant;

use super::color::{Hsl, NEUTRAL};
use super::geometry::{synthesize, MeshBuffers};
use crate::analysis::features::PITCH_CLASSES;

/// Tempo assumed when the service reports none.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Rotation factor the renderer scales per frame: `tempo / 100`.
pub fn rotation_rate(tempo: f64) -> f32 {
    let tempo = if tempo.is_finite() && tempo > 0.0 {
        tempo
    } else {
        DEFAULT_TEMPO
    };
    (tempo / 100.0) as f32
}

/// `MM:SS`, zero padded, truncated to the whole second. Minutes keep
/// counting past 59.
pub fn format_progress(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// Everything a frame needs, replaced as a whole whenever the session
/// changes. Readers hold an `Arc` and never see a half-applied update.
#[derive(Clone, Debug)]
pub struct VisualState {
    pub track_id: Option<String>,
    pub track_label: String,
    pub segment_index: Option<usize>,
    pub mesh: Arc<MeshBuffers>,
    pub color: Hsl,
    pub rotation_rate: f32,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub sampled_at: Option<Instant>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            track_id: None,
            track_label: String::new(),
            segment_index: None,
            mesh: Arc::new(synthesize(&[0.0; PITCH_CLASSES])),
            color: NEUTRAL,
            rotation_rate: rotation_rate(DEFAULT_TEMPO),
            progress_ms: 0,
            duration_ms: 0,
            is_playing: false,
            sampled_at: None,
        }
    }
}

impl VisualState {
    /// Playback position extrapolated from the last poll.
    pub fn position_ms(&self, now: Instant) -> u64 {
        let mut pos = self.progress_ms;
        if self.is_playing {
            if let Some(at) = self.sampled_at {
                pos += now.saturating_duration_since(at).as_millis() as u64;
            }
        }
        if self.duration_ms > 0 {
            pos.min(self.duration_ms)
        } else {
            pos
        }
    }

    pub fn progress_label(&self, now: Instant) -> String {
        format!(
            "{} / {}",
            format_progress(self.position_ms(now)),
            format_progress(self.duration_ms)
        )
    }
}
