use std::sync::Arc;
use std::time::Instant;

use super::error::SyncError;
use super::scheduler::{CursorState, ResyncOutcome, SegmentScheduler, TickOutcome};
use crate::analysis::features::{AudioFeatures, PlaybackSnapshot, TrackAnalysis, PITCH_CLASSES};
use crate::render::color::{color_from_key, color_from_mood, ColorMode, Hsl, NEUTRAL};
use crate::render::geometry::{synthesize, MeshBuffers};
use crate::render::visual::{rotation_rate, VisualState, DEFAULT_TEMPO};
use crate::service::{PollError, SkipDirection};

/// Identifies which track load a response belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTicket {
    pub epoch: u64,
    pub track_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotAction {
    /// Fetch features and analysis for this ticket.
    LoadTrack(RequestTicket),
    Synced(ResyncOutcome),
    /// Position is past the loaded analysis. Nothing to fetch; wait for a
    /// track change or a position back in range.
    Hold,
}

/// The one record shared by the poller, scheduler and render loop. Every
/// response is checked against the current request epoch before it lands.
pub struct Session {
    epoch: u64,
    expected_track: Option<String>,
    snapshot: Option<PlaybackSnapshot>,
    features: Option<Arc<AudioFeatures>>,
    analysis: Option<Arc<TrackAnalysis>>,
    scheduler: SegmentScheduler,
    color_mode: ColorMode,
    visual: Arc<VisualState>,
}

impl Session {
    pub fn new(color_mode: ColorMode, drift_tolerance: usize) -> Self {
        Self {
            epoch: 0,
            expected_track: None,
            snapshot: None,
            features: None,
            analysis: None,
            scheduler: SegmentScheduler::new(drift_tolerance),
            color_mode,
            visual: Arc::new(VisualState::default()),
        }
    }

    /// Latest committed frame values.
    pub fn visual(&self) -> Arc<VisualState> {
        Arc::clone(&self.visual)
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &SegmentScheduler {
        &self.scheduler
    }

    pub fn next_timer(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    fn issue_ticket(&mut self, track_id: &str) -> RequestTicket {
        self.epoch += 1;
        RequestTicket {
            epoch: self.epoch,
            track_id: track_id.to_string(),
        }
    }

    fn check_ticket(&self, ticket: &RequestTicket) -> Result<(), SyncError> {
        let current_track = self.expected_track.as_deref();
        if ticket.epoch != self.epoch || current_track != Some(ticket.track_id.as_str()) {
            return Err(SyncError::StaleResponse {
                track_id: ticket.track_id.clone(),
                epoch: ticket.epoch,
                current: self.epoch,
            });
        }
        Ok(())
    }

    /// Apply a poll. A new track id starts a reload; the same id resyncs
    /// the running chain.
    pub fn apply_snapshot(&mut self, snapshot: PlaybackSnapshot, now: Instant) -> SnapshotAction {
        let changed = self.expected_track.as_deref() != Some(snapshot.track_id.as_str());
        let track_id = snapshot.track_id.clone();
        self.snapshot = Some(snapshot);

        let action = if changed {
            if self.expected_track.is_some() {
                self.scheduler.on_skip(SkipDirection::External);
            }
            if let Some(snap) = self.snapshot.as_ref() {
                log::info!("Now playing: {}", snap.display_name());
            }
            self.expected_track = Some(track_id.clone());
            self.features = None;
            self.analysis = None;
            SnapshotAction::LoadTrack(self.issue_ticket(&track_id))
        } else if self.scheduler.is_awaiting_reload() {
            log::debug!("Reload of {} still pending", track_id);
            SnapshotAction::LoadTrack(self.issue_ticket(&track_id))
        } else {
            self.resync(now, &track_id)
        };
        self.publish();
        action
    }

    fn resync(&mut self, now: Instant, track_id: &str) -> SnapshotAction {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return SnapshotAction::Synced(ResyncOutcome::InSync);
        };
        let was_advancing = self.scheduler.state() == CursorState::Advancing;
        match self.scheduler.resync(snapshot, now) {
            Ok(outcome) => SnapshotAction::Synced(outcome),
            Err(SyncError::IndexOutOfRange {
                position_sec,
                segments,
            }) => {
                if was_advancing {
                    log::warn!(
                        "Position {:.2}s beyond {} known segments of {}, holding",
                        position_sec,
                        segments,
                        track_id
                    );
                } else {
                    log::debug!("Still past the analysis of {} at {:.2}s", track_id, position_sec);
                }
                SnapshotAction::Hold
            }
            Err(err) => {
                // Earlier fetch failed or a skip is pending: try the load again.
                log::debug!("Resync not possible ({}), requesting reload", err);
                SnapshotAction::LoadTrack(self.issue_ticket(track_id))
            }
        }
    }

    pub fn apply_features(
        &mut self,
        ticket: &RequestTicket,
        features: AudioFeatures,
    ) -> Result<(), SyncError> {
        self.check_ticket(ticket)?;
        if features.track_id != ticket.track_id {
            return Err(SyncError::TrackMismatch {
                expected: ticket.track_id.clone(),
                actual: features.track_id,
            });
        }
        self.features = Some(Arc::new(features));
        self.publish();
        Ok(())
    }

    /// Install the analysis and place the cursor at the latest known
    /// position, projected to `now`.
    pub fn apply_analysis(
        &mut self,
        ticket: &RequestTicket,
        analysis: TrackAnalysis,
        now: Instant,
    ) -> Result<usize, SyncError> {
        self.check_ticket(ticket)?;
        if analysis.segments.track_id() != ticket.track_id {
            return Err(SyncError::TrackMismatch {
                expected: ticket.track_id.clone(),
                actual: analysis.segments.track_id().to_string(),
            });
        }
        let (position, playing) = match self.snapshot.as_ref() {
            Some(s) if s.track_id == ticket.track_id => (s.position_at(now), s.is_playing),
            _ => (0.0, false),
        };
        log::info!(
            "Analysis for {}: {} segments, {}, {:.0} BPM",
            ticket.track_id,
            analysis.segments.len(),
            analysis.key_label(),
            analysis.tempo
        );
        let segments = analysis.segments.clone();
        self.analysis = Some(Arc::new(analysis));
        let result = self.scheduler.load_track(segments, position, playing, now);
        self.publish();
        result
    }

    /// Log a failed request. Cached state stays as it is, except that a
    /// player with nothing loaded freezes the cursor.
    pub fn poll_failed(&mut self, err: &PollError, now: Instant) {
        match err {
            PollError::NothingPlaying => {
                if self.scheduler.pause(now) {
                    log::info!("Playback stopped, cursor frozen");
                }
                if let Some(snap) = self.snapshot.as_mut() {
                    snap.is_playing = false;
                }
                self.publish();
            }
            other => log::warn!("Poll failed: {}", other),
        }
    }

    /// A skip was requested locally; the next poll reloads.
    pub fn skip(&mut self, direction: SkipDirection) {
        self.scheduler.on_skip(direction);
        self.publish();
    }

    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.scheduler.on_tick(now);
        if let TickOutcome::Advanced(_) = outcome {
            self.publish();
        }
        outcome
    }

    fn color(&self) -> Hsl {
        match self.color_mode {
            ColorMode::Mood => self
                .features
                .as_ref()
                .map_or(NEUTRAL, |f| color_from_mood(f.danceability, f.energy, f.valence)),
            ColorMode::Key => match self.analysis.as_ref() {
                Some(a) => match a.key {
                    Some(key) => color_from_key(key, a.key_confidence),
                    None => NEUTRAL,
                },
                None => NEUTRAL,
            },
        }
    }

    fn tempo(&self) -> f64 {
        self.features
            .as_ref()
            .map(|f| f.tempo)
            .filter(|t| t.is_finite() && *t > 0.0)
            .or_else(|| self.analysis.as_ref().map(|a| a.tempo))
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// Rebuild the published state. The mesh is only re-synthesised when
    /// the active segment changed.
    fn publish(&mut self) {
        let previous = &self.visual;
        let cursor = self.scheduler.cursor();
        let track_id = cursor.map(|c| c.track_id.clone());
        let segment_index = cursor.map(|c| c.index);

        let mesh: Arc<MeshBuffers> =
            if track_id == previous.track_id && segment_index == previous.segment_index {
                Arc::clone(&previous.mesh)
            } else {
                match self.scheduler.current_segment() {
                    Some(segment) => Arc::new(synthesize(&segment.pitches)),
                    None => Arc::new(synthesize(&[0.0; PITCH_CLASSES])),
                }
            };

        let (track_label, progress_ms, duration_ms, is_playing, sampled_at) =
            match self.snapshot.as_ref() {
                Some(s) => (
                    s.display_name(),
                    s.progress_ms,
                    s.duration_ms,
                    s.is_playing,
                    Some(s.sampled_at),
                ),
                None => (String::new(), 0, 0, false, None),
            };

        self.visual = Arc::new(VisualState {
            track_id,
            track_label,
            segment_index,
            mesh,
            color: self.color(),
            rotation_rate: rotation_rate(self.tempo()),
            progress_ms,
            duration_ms,
            is_playing,
            sampled_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::{Segment, SegmentList};
    use std::time::Duration;

    fn seg(start: f64, dur: f64, level: f64) -> Segment {
        Segment {
            start_sec: start,
            duration_sec: dur,
            confidence: 1.0,
            loudness_max: -8.0,
            pitches: [level; 12],
            timbre: Vec::new(),
        }
    }

    fn analysis(track: &str) -> TrackAnalysis {
        TrackAnalysis {
            segments: SegmentList::new(
                track,
                vec![seg(0.0, 2.0, 0.2), seg(2.0, 3.0, 0.6), seg(5.0, 1.0, 1.0)],
            ),
            key: Some(2),
            key_confidence: 0.5,
            mode: 1,
            tempo: 90.0,
        }
    }

    fn features(track: &str) -> AudioFeatures {
        AudioFeatures {
            track_id: track.into(),
            acousticness: 0.1,
            danceability: 0.8,
            energy: 0.6,
            instrumentalness: 0.0,
            liveness: 0.1,
            loudness: -6.0,
            speechiness: 0.05,
            tempo: 150.0,
            time_signature: 4.0,
            valence: 0.9,
        }
    }

    fn snap(track: &str, progress_ms: u64, is_playing: bool, at: Instant) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: track.into(),
            track_name: "Song".into(),
            artists: vec!["Artist".into()],
            progress_ms,
            duration_ms: 6000,
            is_playing,
            sampled_at: at,
        }
    }

    fn load(session: &mut Session, track: &str, progress_ms: u64, now: Instant) -> RequestTicket {
        let SnapshotAction::LoadTrack(ticket) =
            session.apply_snapshot(snap(track, progress_ms, true, now), now)
        else {
            panic!("expected a load");
        };
        session.apply_features(&ticket, features(track)).unwrap();
        session.apply_analysis(&ticket, analysis(track), now).unwrap();
        ticket
    }

    #[test]
    fn new_track_loads_and_publishes() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 2500, t0);

        let visual = session.visual();
        assert_eq!(visual.track_id.as_deref(), Some("a"));
        assert_eq!(visual.segment_index, Some(1));
        assert_eq!(visual.color.to_string(), "hsl(288, 60%, 90%)");
        assert_eq!(visual.rotation_rate, 1.5);
        assert_eq!(visual.track_label, "Artist - Song");
        assert_eq!(*visual.mesh, synthesize(&[0.6; 12]));
        assert_eq!(session.scheduler().state(), CursorState::Advancing);
    }

    #[test]
    fn stale_responses_are_discarded() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        let SnapshotAction::LoadTrack(old) = session.apply_snapshot(snap("a", 0, true, t0), t0)
        else {
            panic!("expected a load");
        };
        // Track changes before the first track's responses arrive.
        let SnapshotAction::LoadTrack(new) = session.apply_snapshot(snap("b", 0, true, t0), t0)
        else {
            panic!("expected a load");
        };

        let err = session.apply_analysis(&old, analysis("a"), t0).unwrap_err();
        assert!(matches!(err, SyncError::StaleResponse { .. }));
        assert!(session.apply_features(&old, features("a")).is_err());
        assert_eq!(session.scheduler().state(), CursorState::Idle);

        session.apply_analysis(&new, analysis("b"), t0).unwrap();
        assert_eq!(session.scheduler().cursor().unwrap().track_id, "b");
    }

    #[test]
    fn same_track_poll_resyncs() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 0);
        load(&mut session, "a", 0, t0);

        let now = t0 + Duration::from_millis(100);
        let action = session.apply_snapshot(snap("a", 5200, true, now), now);
        assert_eq!(
            action,
            SnapshotAction::Synced(ResyncOutcome::Corrected { from: 0, to: 2 })
        );
        assert_eq!(session.visual().segment_index, Some(2));
        assert_eq!(*session.visual().mesh, synthesize(&[1.0; 12]));
    }

    #[test]
    fn mesh_is_reused_while_segment_is_unchanged() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 0, t0);
        let before = session.visual();
        session.apply_snapshot(snap("a", 500, true, t0), t0);
        let after = session.visual();
        assert!(Arc::ptr_eq(&before.mesh, &after.mesh));
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn timer_ticks_publish_new_mesh() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 0, t0);
        let deadline = session.next_timer().unwrap();
        assert_eq!(session.on_tick(deadline), TickOutcome::Advanced(1));
        assert_eq!(session.visual().segment_index, Some(1));
        assert_eq!(*session.visual().mesh, synthesize(&[0.6; 12]));
    }

    #[test]
    fn track_change_cancels_old_chain() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 2500, t0);
        assert!(session.next_timer().is_some());

        let action = session.apply_snapshot(snap("b", 0, true, t0), t0);
        assert!(matches!(action, SnapshotAction::LoadTrack(_)));
        assert!(session.next_timer().is_none());
        assert_eq!(
            session.on_tick(t0 + Duration::from_secs(60)),
            TickOutcome::Ignored
        );
        // Old features are gone until the new ones arrive.
        assert_eq!(session.visual().color, NEUTRAL);
    }

    #[test]
    fn past_end_holds_without_reloading() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        let first = load(&mut session, "a", 0, t0);

        // Paused in the gap after the last analysed segment (ends at 6s).
        for secs in 7..12u64 {
            let now = t0 + Duration::from_secs(secs);
            let action = session.apply_snapshot(snap("a", secs * 1000, false, now), now);
            assert_eq!(action, SnapshotAction::Hold, "poll at {}s", secs);
        }
        assert_eq!(session.scheduler().state(), CursorState::Armed);
        assert!(session.next_timer().is_none());

        // Seeking back picks the loaded analysis up again, same ticket.
        let now = t0 + Duration::from_secs(12);
        let action = session.apply_snapshot(snap("a", 2500, true, now), now);
        assert_eq!(action, SnapshotAction::Synced(ResyncOutcome::Resumed));
        assert_eq!(session.visual().segment_index, Some(1));
        assert!(session.apply_features(&first, features("a")).is_ok());
    }

    #[test]
    fn analysis_arriving_past_end_is_kept() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        let SnapshotAction::LoadTrack(ticket) =
            session.apply_snapshot(snap("a", 8000, false, t0), t0)
        else {
            panic!("expected a load");
        };
        let err = session.apply_analysis(&ticket, analysis("a"), t0).unwrap_err();
        assert!(matches!(err, SyncError::IndexOutOfRange { segments: 3, .. }));
        assert_eq!(session.scheduler().state(), CursorState::Armed);

        let now = t0 + Duration::from_secs(1);
        let action = session.apply_snapshot(snap("a", 9000, false, now), now);
        assert_eq!(action, SnapshotAction::Hold);
    }

    #[test]
    fn nothing_playing_freezes_cursor() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 2500, t0);
        session.poll_failed(&PollError::NothingPlaying, t0 + Duration::from_millis(300));
        assert_eq!(session.scheduler().state(), CursorState::Paused);
        assert!(!session.visual().is_playing);
        assert_eq!(session.visual().segment_index, Some(1));
    }

    #[test]
    fn other_failures_keep_state() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        load(&mut session, "a", 0, t0);
        let before = session.visual();
        session.poll_failed(&PollError::Status(503), t0);
        assert!(Arc::ptr_eq(&before, &session.visual()));
        assert_eq!(session.scheduler().state(), CursorState::Advancing);
    }

    #[test]
    fn key_mode_uses_analysis_key() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Key, 1);
        load(&mut session, "a", 0, t0);
        assert_eq!(session.visual().color.to_string(), "hsl(60, 50%, 95%)");
    }

    #[test]
    fn missing_tempo_falls_back_to_analysis() {
        let t0 = Instant::now();
        let mut session = Session::new(ColorMode::Mood, 1);
        let SnapshotAction::LoadTrack(ticket) = session.apply_snapshot(snap("a", 0, true, t0), t0)
        else {
            panic!("expected a load");
        };
        let mut f = features("a");
        f.tempo = f64::NAN;
        f.valence = f64::NAN;
        session.apply_features(&ticket, f).unwrap();
        session.apply_analysis(&ticket, analysis("a"), t0).unwrap();
        assert_eq!(session.visual().rotation_rate, 0.9);
        assert_eq!(session.visual().color, NEUTRAL);
    }
}
