mod analysis;
mod app;
mod cli;
mod config;
mod encode;
mod render;
mod service;
mod sync;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use app::LoopConfig;
use cli::Cli;
use encode::ffmpeg::EncoderSettings;
use render::color::ColorMode;
use render::sink::{FrameSink, LogSink, RecordingOptions, RecordingSink};
use render::text::load_font;
use service::{PlaybackSource, SpotifyPoller};
use sync::clock::SystemClock;
use sync::Session;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let cfg = match config::find_config(cli.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                config::Config::default()
            }
        },
        None => config::Config::default(),
    };

    // Config values apply only where the CLI is at its default
    if cli.width == 1280 { cli.width = cfg.render.width; }
    if cli.height == 720 { cli.height = cfg.render.height; }
    if cli.fps == 30 { cli.fps = cfg.render.fps; }
    if cli.crf == 18 { cli.crf = cfg.record.crf; }
    if cli.codec == "libx264" { cli.codec = cfg.record.codec.clone(); }
    if cli.pix_fmt == "yuv420p" { cli.pix_fmt = cfg.record.pix_fmt.clone(); }
    if cli.color_mode == "mood" { cli.color_mode = cfg.render.color_mode.clone(); }
    if cli.poll_interval_ms == 1000 { cli.poll_interval_ms = cfg.sync.poll_interval_ms; }
    if cli.font.is_none() {
        cli.font = cfg.render.font.clone();
    }
    if cli.font_url.is_none() {
        cli.font_url = cfg.render.font_url.clone();
    }

    let color_mode: ColorMode = cli.color_mode.parse().map_err(anyhow::Error::msg)?;
    if cli.fps == 0 {
        anyhow::bail!("--fps must be at least 1");
    }

    let token = match cli.token.take() {
        Some(token) => token,
        None => std::env::var(&cfg.service.token_env).with_context(|| {
            format!(
                "No access token: pass --token or set {}",
                cfg.service.token_env
            )
        })?,
    };

    log::info!("chromasync - live track visualizer");
    log::info!("Service: {}", cfg.service.base_url);
    log::info!("Color mode: {:?}, poll every {}ms", color_mode, cli.poll_interval_ms);

    let mut source = SpotifyPoller::new(
        &cfg.service.base_url,
        token,
        Duration::from_millis(cfg.service.timeout_ms),
    )?;
    let mut session = Session::new(color_mode, cfg.sync.drift_tolerance);

    if let Some(direction) = cli.skip {
        log::info!("Skipping ({:?})", direction);
        source
            .skip(direction)
            .with_context(|| format!("Skip {:?} failed", direction))?;
        session.skip(direction);
    }

    let run_for = match cli.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => anyhow::bail!("Invalid --duration {}", secs),
        None => None,
    };

    let font_bytes = if cli.title || cli.show_time {
        match load_font(cli.font.as_deref(), cli.font_url.as_deref()) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("Failed to load font: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let mut sink: Box<dyn FrameSink> = match cli.output.as_deref() {
        Some(output) => {
            if run_for.is_none() {
                log::warn!("Recording without --duration; stop with Ctrl-C loses the file trailer");
            }
            log::info!("Recording {}x{} @ {}fps to {}", cli.width, cli.height, cli.fps, output.display());
            Box::new(RecordingSink::new(RecordingOptions {
                output,
                encoder: EncoderSettings {
                    width: cli.width,
                    height: cli.height,
                    fps: cli.fps,
                    codec: &cli.codec,
                    pix_fmt: &cli.pix_fmt,
                    crf: cli.crf,
                    bitrate: cli.bitrate.as_deref(),
                },
                font: font_bytes.as_deref(),
                show_time: cli.show_time,
                show_title: cli.title,
                total_frames: run_for.map(|d| (d.as_secs_f64() * cli.fps as f64).ceil() as u64),
            })?)
        }
        None => Box::new(LogSink::default()),
    };

    let loop_cfg = LoopConfig {
        poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
        frame_interval: Duration::from_secs_f64(1.0 / cli.fps as f64),
        rotation_scale: cfg.render.rotation_scale,
        run_for,
        catch_up: cli.output.is_some(),
    };

    let stats = app::run(&mut session, &mut source, &SystemClock, sink.as_mut(), &loop_cfg)?;

    if let Some(output) = cli.output.as_deref() {
        log::info!("Done! {} frames written to {}", stats.frames, output.display());
    }
    Ok(())
}
