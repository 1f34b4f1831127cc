use anyhow::Result;
use std::time::Duration;

use crate::render::sink::FrameSink;
use crate::service::{PlaybackSource, PollError};
use crate::sync::clock::Clock;
use crate::sync::scheduler::{ResyncOutcome, TickOutcome};
use crate::sync::session::RequestTicket;
use crate::sync::{Session, SnapshotAction, SyncError};

pub struct LoopConfig {
    pub poll_interval: Duration,
    pub frame_interval: Duration,
    pub rotation_scale: f32,
    /// Stop after this long; `None` runs until the process is killed.
    pub run_for: Option<Duration>,
    /// Present every frame slot even when the sink falls behind. Recording
    /// needs this so the video keeps `run_for * fps` frames.
    pub catch_up: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub dropped_frames: u64,
    pub polls: u64,
    pub poll_failures: u64,
    pub advances: u64,
    pub corrections: u64,
    pub track_loads: u64,
}

/// The shader tilts by half the angle, so wrap at two turns to keep the
/// tilt continuous.
pub fn advance_angle(angle: f32, rotation_rate: f32, rotation_scale: f32) -> f32 {
    (angle + rotation_rate * rotation_scale).rem_euclid(2.0 * std::f32::consts::TAU)
}

/// Cooperative loop: timer firings, polls and frames on one thread, sleeping
/// until the earliest of their deadlines.
pub fn run(
    session: &mut Session,
    source: &mut dyn PlaybackSource,
    clock: &dyn Clock,
    sink: &mut dyn FrameSink,
    cfg: &LoopConfig,
) -> Result<LoopStats> {
    let mut stats = LoopStats::default();
    let start = clock.now();
    let end = cfg.run_for.map(|d| start + d);
    let mut next_poll = start;
    let mut next_frame = start;
    let mut angle = 0.0f32;

    loop {
        let now = clock.now();
        if let Some(e) = end {
            if now >= e && (!cfg.catch_up || next_frame >= e) {
                break;
            }
        }

        while session.next_timer().is_some_and(|d| d <= now) {
            if let TickOutcome::Advanced(_) = session.on_tick(now) {
                stats.advances += 1;
            }
        }

        if now >= next_poll {
            let delay = poll_once(session, source, clock, &mut stats);
            next_poll = clock.now() + delay.unwrap_or(cfg.poll_interval);
        }

        let now = clock.now();
        if now >= next_frame && end.map_or(true, |e| next_frame < e) {
            let visual = session.visual();
            angle = advance_angle(angle, visual.rotation_rate, cfg.rotation_scale);
            sink.present(&visual, angle, now)?;
            stats.frames += 1;
            next_frame += cfg.frame_interval;
            if !cfg.catch_up {
                let presented_at = clock.now();
                while next_frame <= presented_at {
                    next_frame += cfg.frame_interval;
                    stats.dropped_frames += 1;
                }
            }
        }

        let mut wake = next_poll.min(next_frame);
        if let Some(timer) = session.next_timer() {
            wake = wake.min(timer);
        }
        if let Some(e) = end {
            wake = wake.min(e);
        }
        clock.sleep_until(wake);
    }

    sink.finish()?;
    log::info!(
        "Loop finished: {} frames ({} dropped), {} polls ({} failed), {} segment advances, {} drift corrections",
        stats.frames,
        stats.dropped_frames,
        stats.polls,
        stats.poll_failures,
        stats.advances,
        stats.corrections
    );
    Ok(stats)
}

/// One poll plus any follow-up fetches. Returns a back-off delay when the
/// service asked for one.
fn poll_once(
    session: &mut Session,
    source: &mut dyn PlaybackSource,
    clock: &dyn Clock,
    stats: &mut LoopStats,
) -> Option<Duration> {
    stats.polls += 1;
    match source.poll() {
        Ok(snapshot) => match session.apply_snapshot(snapshot, clock.now()) {
            SnapshotAction::LoadTrack(ticket) => {
                load_track(session, source, clock, &ticket, stats);
                None
            }
            SnapshotAction::Synced(ResyncOutcome::Corrected { .. }) => {
                stats.corrections += 1;
                None
            }
            SnapshotAction::Synced(outcome) => {
                log::debug!("Resync: {:?}", outcome);
                None
            }
            SnapshotAction::Hold => None,
        },
        Err(PollError::RateLimited { retry_after_secs }) => {
            stats.poll_failures += 1;
            let wait = Duration::from_secs(retry_after_secs.unwrap_or(5).max(1));
            log::warn!("Rate limited, next poll in {:?}", wait);
            Some(wait)
        }
        Err(err) => {
            if !matches!(err, PollError::NothingPlaying) {
                stats.poll_failures += 1;
            }
            session.poll_failed(&err, clock.now());
            None
        }
    }
}

fn load_track(
    session: &mut Session,
    source: &mut dyn PlaybackSource,
    clock: &dyn Clock,
    ticket: &RequestTicket,
    stats: &mut LoopStats,
) {
    match source.fetch_features(&ticket.track_id) {
        Ok(features) => report(session.apply_features(ticket, features), "features"),
        Err(err) => log::warn!("Features for {} unavailable: {}", ticket.track_id, err),
    }

    match source.fetch_analysis(&ticket.track_id) {
        Ok(analysis) => match session.apply_analysis(ticket, analysis, clock.now()) {
            Ok(_) => stats.track_loads += 1,
            Err(SyncError::IndexOutOfRange { position_sec, .. }) => {
                stats.track_loads += 1;
                log::info!(
                    "{} is at {:.1}s, past its analysis; holding",
                    ticket.track_id,
                    position_sec
                );
            }
            Err(err) => report(Err(err), "analysis"),
        },
        Err(err) => log::warn!("Analysis for {} unavailable: {}", ticket.track_id, err),
    }
}

fn report(result: Result<(), SyncError>, what: &str) {
    match result {
        Ok(()) => {}
        Err(SyncError::StaleResponse { .. }) => log::debug!("Dropped stale {}", what),
        Err(err) => log::warn!("Could not apply {}: {}", what, err),
    }
}
