use clap::Parser;
use std::path::PathBuf;

use crate::service::SkipDirection;

#[derive(Parser, Debug)]
#[command(name = "chromasync", about = "Live 3D visualizer synced to the currently playing track")]
pub struct Cli {
    /// Bearer token for the audio service (defaults to the env var named in config)
    #[arg(long)]
    pub token: Option<String>,

    /// Config file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Record the visualization to this video file instead of running headless
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Playback poll / hard resync interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Color source: mood (danceability/energy/valence) or key
    #[arg(long, default_value = "mood")]
    pub color_mode: String,

    /// Skip to the next or previous track before starting
    #[arg(long)]
    pub skip: Option<SkipDirection>,

    /// Video width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// H.264 CRF quality (0-51, lower = better). Ignored when --bitrate is set.
    #[arg(long, default_value_t = 18)]
    pub crf: u32,

    /// Video bitrate (e.g. 2400k, 5M). When set, uses -b:v instead of -crf.
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// Show the track name overlay
    #[arg(long)]
    pub title: bool,

    /// Show the playback position overlay
    #[arg(long)]
    pub show_time: bool,

    /// TTF/OTF font file for overlays
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Download the overlay font from this URL
    #[arg(long)]
    pub font_url: Option<String>,
}
