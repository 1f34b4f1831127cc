use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub record: RecordConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    /// Hard-resync cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Segments the timer chain may drift before it is rebuilt
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: usize,
}

#[derive(Debug, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_color_mode")]
    pub color_mode: String,
    #[serde(default = "default_rotation_scale")]
    pub rotation_scale: f32,
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(default)]
    pub font_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordConfig {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            color_mode: default_color_mode(),
            rotation_scale: default_rotation_scale(),
            font: None,
            font_url: None,
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            crf: default_crf(),
            pix_fmt: default_pix_fmt(),
        }
    }
}

fn default_base_url() -> String { "https://api.spotify.com/v1".into() }
fn default_token_env() -> String { "SPOTIFY_TOKEN".into() }
fn default_timeout_ms() -> u64 { 5000 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_drift_tolerance() -> usize { 1 }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_fps() -> u32 { 30 }
fn default_color_mode() -> String { "mood".into() }
fn default_rotation_scale() -> f32 { 0.01 }
fn default_codec() -> String { "libx264".into() }
fn default_crf() -> u32 { 18 }
fn default_pix_fmt() -> String { "yuv420p".into() }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// `--config`, then `chromasync.toml`, then the user config directories.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("chromasync.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("chromasync").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("chromasync").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.service.base_url, "https://api.spotify.com/v1");
        assert_eq!(cfg.sync.poll_interval_ms, 1000);
        assert_eq!(cfg.sync.drift_tolerance, 1);
        assert_eq!(cfg.render.color_mode, "mood");
        assert_eq!(cfg.record.crf, 18);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [sync]
            poll_interval_ms = 2500

            [render]
            color_mode = "key"
            font = "/usr/share/fonts/mono.ttf"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sync.poll_interval_ms, 2500);
        assert_eq!(cfg.sync.drift_tolerance, 1);
        assert_eq!(cfg.render.color_mode, "key");
        assert_eq!(cfg.render.width, 1280);
        assert_eq!(cfg.render.font, Some(PathBuf::from("/usr/share/fonts/mono.ttf")));
    }

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/tmp/custom.toml");
        assert_eq!(find_config(Some(p)), Some(p.to_path_buf()));
    }

    #[test]
    fn missing_file_is_none() {
        assert!(load_config(Path::new("/nonexistent/chromasync.toml")).is_none());
    }
}
