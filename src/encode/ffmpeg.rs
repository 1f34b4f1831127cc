use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Video settings for the recording surface.
pub struct EncoderSettings<'a> {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: &'a str,
    pub pix_fmt: &'a str,
    pub crf: u32,
    pub bitrate: Option<&'a str>,
}

pub fn ffmpeg_args(output_path: &Path, s: &EncoderSettings<'_>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-f".into(), "rawvideo".into(),
        "-pixel_format".into(), "rgba".into(),
        "-video_size".into(), format!("{}x{}", s.width, s.height),
        "-framerate".into(), s.fps.to_string(),
        "-i".into(), "pipe:0".into(),
        "-an".into(),
        "-c:v".into(), s.codec.to_string(),
        "-pix_fmt".into(), s.pix_fmt.to_string(),
    ];

    if let Some(br) = s.bitrate {
        args.extend(["-b:v".to_string(), br.to_string()]);
    } else {
        args.extend(["-crf".to_string(), s.crf.to_string()]);
        args.extend(["-preset".to_string(), "medium".to_string()]);
    }

    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Pipes raw RGBA frames into an ffmpeg child process.
pub struct FfmpegEncoder {
    child: Child,
}

impl FfmpegEncoder {
    pub fn new(output_path: &Path, settings: &EncoderSettings<'_>) -> Result<Self> {
        let child = Command::new("ffmpeg")
            .args(ffmpeg_args(output_path, settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, codec={}",
            settings.width,
            settings.height,
            settings.fps,
            settings.codec
        );

        Ok(Self { child })
    }

    pub fn write_frame(&mut self, rgba_pixels: &[u8]) -> Result<()> {
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(rgba_pixels).context("Failed to write frame to ffmpeg")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg encoding complete");
        Ok(())
    }
}
