use std::time::{Duration, Instant};

use super::error::SyncError;
#[cfg(test)]
use super::timer::TimerHandle;
use super::timer::TimerSlot;
use crate::analysis::features::{PlaybackSnapshot, Segment, SegmentList};
use crate::analysis::locate::locate;
use crate::service::SkipDirection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    /// No track loaded
    Idle,
    /// Segments and cursor set, not playing
    Armed,
    /// Timer chain running
    Advancing,
    /// Cursor frozen by a pause
    Paused,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SegmentCursor {
    pub track_id: String,
    pub index: usize,
    /// Local time the cursor entered the current segment
    pub active_since: Instant,
    pub state: CursorState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced(usize),
    /// Last segment reached; the chain stops until the next resync.
    EndOfTrack,
    /// No due timer, or the cursor is not advancing.
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncOutcome {
    InSync,
    /// Same segment, pending deadline moved onto the remote boundary.
    Retimed,
    Corrected { from: usize, to: usize },
    Paused,
    Resumed,
}

pub struct SegmentScheduler {
    segments: Option<SegmentList>,
    cursor: Option<SegmentCursor>,
    timer: TimerSlot,
    /// Index drift (in segments) tolerated before the chain is rebuilt.
    tolerance: usize,
    /// Position inside the current segment while not advancing.
    frozen_elapsed: Duration,
    awaiting_reload: bool,
}

impl SegmentScheduler {
    pub fn new(tolerance: usize) -> Self {
        Self {
            segments: None,
            cursor: None,
            timer: TimerSlot::new(),
            tolerance,
            frozen_elapsed: Duration::ZERO,
            awaiting_reload: false,
        }
    }

    pub fn state(&self) -> CursorState {
        self.cursor.as_ref().map_or(CursorState::Idle, |c| c.state)
    }

    pub fn cursor(&self) -> Option<&SegmentCursor> {
        self.cursor.as_ref()
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        let cursor = self.cursor.as_ref()?;
        self.segments.as_ref()?.get(cursor.index)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    #[cfg(test)]
    pub fn pending_timer(&self) -> Option<TimerHandle> {
        self.timer.pending()
    }

    pub fn is_awaiting_reload(&self) -> bool {
        self.awaiting_reload
    }

    /// Install a new segment list and place the cursor at
    /// `initial_progress_sec`. Any pending timer is dropped before the new
    /// state goes in. A position past the last segment keeps the list but
    /// leaves the cursor `Armed` on the final segment and reports
    /// `IndexOutOfRange`.
    pub fn load_track(
        &mut self,
        segments: SegmentList,
        initial_progress_sec: f64,
        is_playing: bool,
        now: Instant,
    ) -> Result<usize, SyncError> {
        self.timer.cancel();
        self.awaiting_reload = false;

        if segments.is_empty() {
            self.unload();
            return Err(SyncError::EmptySegments);
        }

        let past_end = initial_progress_sec > segments.end_sec();
        let count = segments.len();
        let index = locate(segments.segments(), initial_progress_sec);
        let offset = offset_into(&segments.segments()[index], initial_progress_sec);
        let track_id = segments.track_id().to_string();
        self.segments = Some(segments);
        self.cursor = Some(SegmentCursor {
            track_id,
            index,
            active_since: back_from(now, offset),
            state: CursorState::Armed,
        });
        self.frozen_elapsed = offset;

        if past_end {
            return Err(SyncError::IndexOutOfRange {
                position_sec: initial_progress_sec,
                segments: count,
            });
        }
        if is_playing {
            self.start_chain();
        }
        log::debug!(
            "Loaded {} segments, cursor at {} ({:?})",
            self.segments.as_ref().map_or(0, SegmentList::len),
            index,
            self.state()
        );
        Ok(index)
    }

    /// Timer callback. Advances one segment and re-arms for its duration.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        let Some(fired) = self.timer.take_due(now) else {
            return TickOutcome::Ignored;
        };
        if self.awaiting_reload || self.state() != CursorState::Advancing {
            return TickOutcome::Ignored;
        }
        let (Some(segments), Some(cursor)) = (self.segments.as_ref(), self.cursor.as_mut()) else {
            return TickOutcome::Ignored;
        };

        if cursor.index + 1 >= segments.len() {
            log::debug!("Reached last segment of {}", cursor.track_id);
            return TickOutcome::EndOfTrack;
        }

        cursor.index += 1;
        // Chain from the nominal deadline, not from `now`.
        cursor.active_since = fired.deadline;
        let duration = secs(segments.segments()[cursor.index].duration_sec);
        let index = cursor.index;
        self.timer.arm(fired.deadline + duration);
        log::debug!("Timer {} fired: segment {} / {}", fired.id, index, segments.len());
        TickOutcome::Advanced(index)
    }

    /// Hard resync against a fresh poll.
    pub fn resync(
        &mut self,
        snapshot: &PlaybackSnapshot,
        now: Instant,
    ) -> Result<ResyncOutcome, SyncError> {
        if self.awaiting_reload {
            return Err(SyncError::AwaitingReload);
        }
        let (Some(segments), Some(cursor)) = (self.segments.as_ref(), self.cursor.as_ref()) else {
            return Err(SyncError::NotLoaded);
        };
        if snapshot.track_id != cursor.track_id {
            return Err(SyncError::TrackMismatch {
                expected: cursor.track_id.clone(),
                actual: snapshot.track_id.clone(),
            });
        }

        let position_sec = snapshot.position_at(now);
        if position_sec > segments.end_sec() {
            let count = segments.len();
            self.timer.cancel();
            if let Some(c) = self.cursor.as_mut() {
                c.state = CursorState::Armed;
            }
            return Err(SyncError::IndexOutOfRange {
                position_sec,
                segments: count,
            });
        }

        let located = locate(segments.segments(), position_sec);
        let offset = offset_into(&segments.segments()[located], position_sec);
        let current = cursor.index;
        let state = cursor.state;

        let outcome = match (state, snapshot.is_playing) {
            (CursorState::Advancing, true) => {
                if located.abs_diff(current) > self.tolerance {
                    log::info!(
                        "Drift correction on {}: segment {} -> {}",
                        cursor.track_id,
                        current,
                        located
                    );
                    self.place(located, offset, now);
                    self.arm_current();
                    ResyncOutcome::Corrected {
                        from: current,
                        to: located,
                    }
                } else if located == current && self.timer.pending().is_some() {
                    self.place(located, offset, now);
                    self.arm_current();
                    ResyncOutcome::Retimed
                } else {
                    ResyncOutcome::InSync
                }
            }
            (CursorState::Advancing, false) => {
                self.timer.cancel();
                self.place(located, offset, now);
                self.set_state(CursorState::Paused);
                ResyncOutcome::Paused
            }
            (_, true) => {
                self.place(located, offset, now);
                self.resume(now);
                ResyncOutcome::Resumed
            }
            (_, false) => {
                self.place(located, offset, now);
                if located == current {
                    ResyncOutcome::InSync
                } else {
                    ResyncOutcome::Corrected {
                        from: current,
                        to: located,
                    }
                }
            }
        };
        Ok(outcome)
    }

    /// Freeze the cursor. Returns false when nothing was advancing.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.state() != CursorState::Advancing {
            return false;
        }
        self.timer.cancel();
        if let Some(cursor) = self.cursor.as_ref() {
            let elapsed = now.saturating_duration_since(cursor.active_since);
            let limit = self
                .current_segment()
                .map_or(elapsed, |s| secs(s.duration_sec));
            self.frozen_elapsed = elapsed.min(limit);
        }
        self.set_state(CursorState::Paused);
        true
    }

    /// Re-arm the chain from where the cursor was frozen.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.awaiting_reload
            || !matches!(self.state(), CursorState::Paused | CursorState::Armed)
        {
            return false;
        }
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.active_since = back_from(now, self.frozen_elapsed);
        }
        self.start_chain();
        true
    }

    /// The player moved to another track. Drop the chain and wait for a
    /// poll-driven reload instead of guessing the next segment list.
    pub fn on_skip(&mut self, direction: SkipDirection) {
        self.timer.cancel();
        if let Some(cursor) = self.cursor.as_mut() {
            log::debug!("Skip {:?} from {} at segment {}", direction, cursor.track_id, cursor.index);
            cursor.state = CursorState::Armed;
            self.awaiting_reload = true;
        }
    }

    /// Back to `Idle`.
    pub fn unload(&mut self) {
        self.timer.cancel();
        self.segments = None;
        self.cursor = None;
        self.frozen_elapsed = Duration::ZERO;
        self.awaiting_reload = false;
    }

    fn place(&mut self, index: usize, offset: Duration, now: Instant) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.index = index;
            cursor.active_since = back_from(now, offset);
        }
        self.frozen_elapsed = offset;
    }

    fn set_state(&mut self, state: CursorState) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.state = state;
        }
    }

    fn start_chain(&mut self) {
        self.set_state(CursorState::Advancing);
        self.arm_current();
    }

    /// Arm for the remaining part of the current segment.
    fn arm_current(&mut self) {
        let deadline = match (self.cursor.as_ref(), self.current_segment()) {
            (Some(cursor), Some(segment)) => cursor.active_since + secs(segment.duration_sec),
            _ => return,
        };
        self.timer.arm(deadline);
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn offset_into(segment: &Segment, position_sec: f64) -> Duration {
    secs((position_sec - segment.start_sec).clamp(0.0, segment.duration_sec.max(0.0)))
}

fn back_from(now: Instant, offset: Duration) -> Instant {
    now.checked_sub(offset).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::segment;

    fn three(track: &str) -> SegmentList {
        SegmentList::new(
            track,
            vec![segment(0.0, 2.0), segment(2.0, 3.0), segment(5.0, 1.0)],
        )
    }

    fn snap(track: &str, progress_ms: u64, is_playing: bool, at: Instant) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: track.into(),
            track_name: String::new(),
            artists: Vec::new(),
            progress_ms,
            duration_ms: 6000,
            is_playing,
            sampled_at: at,
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn load_places_cursor_and_arms_remaining() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        assert_eq!(s.state(), CursorState::Idle);

        let index = s.load_track(three("a"), 2.5, true, t0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(s.state(), CursorState::Advancing);
        assert_eq!(s.next_deadline(), Some(t0 + ms(2500)));
    }

    #[test]
    fn load_not_playing_is_armed_without_timer() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.5, false, t0).unwrap();
        assert_eq!(s.state(), CursorState::Armed);
        assert!(s.next_deadline().is_none());
    }

    #[test]
    fn load_rejects_empty_list() {
        let mut s = SegmentScheduler::new(1);
        let err = s
            .load_track(SegmentList::new("a", Vec::new()), 0.0, true, Instant::now())
            .unwrap_err();
        assert_eq!(err, SyncError::EmptySegments);
        assert_eq!(s.state(), CursorState::Idle);
    }

    #[test]
    fn ticks_chain_through_segments_then_stop() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();

        assert_eq!(s.on_tick(t0 + ms(1999)), TickOutcome::Ignored);
        assert_eq!(s.on_tick(t0 + ms(2010)), TickOutcome::Advanced(1));
        // Next deadline chains off the nominal boundary, not the late firing.
        assert_eq!(s.next_deadline(), Some(t0 + ms(5000)));
        assert_eq!(s.on_tick(t0 + ms(5000)), TickOutcome::Advanced(2));
        assert_eq!(s.on_tick(t0 + ms(6000)), TickOutcome::EndOfTrack);
        assert!(s.next_deadline().is_none());
        assert_eq!(s.cursor().unwrap().index, 2);
        assert_eq!(s.state(), CursorState::Advancing);
    }

    #[test]
    fn resync_corrects_large_drift_with_remaining_duration() {
        let t0 = Instant::now();
        let segs: Vec<_> = (0..10).map(|i| segment(i as f64, 1.0)).collect();
        let mut s = SegmentScheduler::new(1);
        s.load_track(SegmentList::new("a", segs), 0.0, true, t0).unwrap();

        // Remote says 7.25s, sampled 100ms before we handle it.
        let now = t0 + ms(500);
        let sampled = now - ms(100);
        let out = s.resync(&snap("a", 7250, true, sampled), now).unwrap();
        assert_eq!(out, ResyncOutcome::Corrected { from: 0, to: 7 });
        assert_eq!(s.cursor().unwrap().index, 7);

        // True boundary of segment 7 (8.0s) as seen from the sample point.
        let boundary = sampled + ms(750);
        let deadline = s.next_deadline().unwrap();
        let error = if deadline > boundary { deadline - boundary } else { boundary - deadline };
        assert!(error <= ms(1), "deadline off by {:?}", error);
    }

    #[test]
    fn resync_within_tolerance_keeps_chain() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();
        let pending = s.pending_timer();

        let out = s.resync(&snap("a", 2100, true, t0), t0).unwrap();
        assert_eq!(out, ResyncOutcome::InSync);
        assert_eq!(s.pending_timer(), pending);
        assert_eq!(s.cursor().unwrap().index, 0);
    }

    #[test]
    fn resync_same_segment_retimes_deadline() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();

        // Remote is 300ms ahead of our chain.
        let out = s.resync(&snap("a", 1300, true, t0 + ms(1000)), t0 + ms(1000)).unwrap();
        assert_eq!(out, ResyncOutcome::Retimed);
        assert_eq!(s.next_deadline(), Some(t0 + ms(1700)));
    }

    #[test]
    fn resync_pause_and_resume() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();

        let out = s.resync(&snap("a", 2500, false, t0), t0).unwrap();
        assert_eq!(out, ResyncOutcome::Paused);
        assert_eq!(s.state(), CursorState::Paused);
        assert!(s.next_deadline().is_none());
        assert_eq!(s.cursor().unwrap().index, 1);

        let later = t0 + ms(10_000);
        let out = s.resync(&snap("a", 2500, true, later), later).unwrap();
        assert_eq!(out, ResyncOutcome::Resumed);
        assert_eq!(s.next_deadline(), Some(later + ms(2500)));
    }

    #[test]
    fn resync_past_known_segments_falls_back_to_armed() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();

        let err = s.resync(&snap("a", 9000, true, t0), t0).unwrap_err();
        assert!(matches!(err, SyncError::IndexOutOfRange { segments: 3, .. }));
        assert_eq!(s.state(), CursorState::Armed);
        assert!(s.next_deadline().is_none());
        // The list is kept; only a track change needs a reload.
        assert!(!s.is_awaiting_reload());

        // Seeking back into range restarts the chain from the loaded list.
        let later = t0 + ms(1000);
        let out = s.resync(&snap("a", 5500, true, later), later).unwrap();
        assert_eq!(out, ResyncOutcome::Resumed);
        assert_eq!(s.cursor().unwrap().index, 2);
        assert_eq!(s.next_deadline(), Some(later + ms(500)));
    }

    #[test]
    fn load_past_end_keeps_list_without_clamping() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        let err = s.load_track(three("a"), 7.0, true, t0).unwrap_err();
        assert!(matches!(err, SyncError::IndexOutOfRange { segments: 3, .. }));
        assert_eq!(s.state(), CursorState::Armed);
        assert!(s.next_deadline().is_none());
        assert_eq!(s.cursor().unwrap().index, 2);

        // Still past the end: reported again, nothing restarts.
        let err = s.resync(&snap("a", 8000, true, t0), t0).unwrap_err();
        assert!(matches!(err, SyncError::IndexOutOfRange { .. }));
        assert_eq!(s.state(), CursorState::Armed);
        assert!(s.next_deadline().is_none());
    }

    #[test]
    fn resync_for_other_track_is_mismatch() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();
        let err = s.resync(&snap("b", 0, true, t0), t0).unwrap_err();
        assert!(matches!(err, SyncError::TrackMismatch { .. }));
    }

    #[test]
    fn pause_resume_keeps_index() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 2.5, true, t0).unwrap();

        assert!(s.pause(t0 + ms(1000)));
        assert_eq!(s.state(), CursorState::Paused);
        assert!(s.next_deadline().is_none());
        assert_eq!(s.on_tick(t0 + ms(60_000)), TickOutcome::Ignored);

        let resumed_at = t0 + ms(60_000);
        assert!(s.resume(resumed_at));
        assert_eq!(s.cursor().unwrap().index, 1);
        // 0.5s in at load + 1.0s played = 1.5s of 3.0s left.
        assert_eq!(s.next_deadline(), Some(resumed_at + ms(1500)));
    }

    #[test]
    fn skip_cancels_chain_before_reload() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 2.5, true, t0).unwrap();
        assert_eq!(s.cursor().unwrap().index, 1);

        s.on_skip(SkipDirection::Next);
        assert_eq!(s.state(), CursorState::Armed);
        assert!(s.next_deadline().is_none());
        // Nothing fires for the old track, however long we wait.
        assert_eq!(s.on_tick(t0 + ms(100_000)), TickOutcome::Ignored);
        assert_eq!(s.cursor().unwrap().track_id, "a");
        assert_eq!(
            s.resync(&snap("a", 0, true, t0), t0).unwrap_err(),
            SyncError::AwaitingReload
        );
        assert!(!s.resume(t0));

        let later = t0 + ms(100_000);
        s.load_track(three("b"), 0.0, true, later).unwrap();
        assert_eq!(s.cursor().unwrap().track_id, "b");
        assert_eq!(s.next_deadline(), Some(later + ms(2000)));
    }

    #[test]
    fn reload_replaces_pending_timer() {
        let t0 = Instant::now();
        let mut s = SegmentScheduler::new(1);
        s.load_track(three("a"), 0.0, true, t0).unwrap();
        let old = s.pending_timer().unwrap();

        let long = SegmentList::new("b", vec![segment(0.0, 10.0)]);
        s.load_track(long, 0.0, true, t0).unwrap();
        let new = s.pending_timer().unwrap();
        assert_ne!(old.id, new.id);
        // The old 2s boundary no longer fires.
        assert_eq!(s.on_tick(t0 + ms(2000)), TickOutcome::Ignored);
        assert_eq!(s.cursor().unwrap().index, 0);
    }
}
