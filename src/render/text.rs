use anyhow::{Context, Result};
use fontdue::{Font, FontSettings};
use std::path::Path;

pub struct TextOverlay {
    font: Font,
    font_size: f32,
}

/// Font bytes from a local path, else a URL. `None` when neither is set.
pub fn load_font(path: Option<&Path>, url: Option<&str>) -> Result<Option<Vec<u8>>> {
    if let Some(path) = path {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font: {}", path.display()))?;
        return Ok(Some(bytes));
    }
    match url {
        Some(url) => load_font_from_url(url).map(Some),
        None => Ok(None),
    }
}

pub fn load_font_from_url(url: &str) -> Result<Vec<u8>> {
    log::info!("Downloading font from {}", url);
    let resp = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to download font: {}", url))?;
    let bytes = resp.bytes().context("Failed to read font body")?;
    Ok(bytes.to_vec())
}

impl TextOverlay {
    pub fn new(font_size: f32, font_data: &[u8]) -> Result<Self> {
        let font = Font::from_bytes(font_data, FontSettings::default())
            .map_err(|e| anyhow::anyhow!("Failed to parse font: {}", e))?;
        Ok(Self { font, font_size })
    }

    pub fn line_height(&self) -> u32 {
        self.font_size.ceil() as u32
    }

    /// Composite text onto an RGBA pixel buffer at the given position.
    pub fn composite(
        &self,
        pixels: &mut [u8],
        width: u32,
        height: u32,
        text: &str,
        x: u32,
        y: u32,
        color: [u8; 4],
    ) {
        let mut cursor_x = x as i32;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, self.font_size);
            let glyph_y = y as i32 + self.font_size as i32 - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let alpha = bitmap[gy * metrics.width + gx];
                    if alpha == 0 {
                        continue;
                    }

                    let px = cursor_x + gx as i32;
                    let py = glyph_y + gy as i32;
                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }

                    let idx = ((py as u32 * width + px as u32) * 4) as usize;
                    if idx + 3 >= pixels.len() {
                        continue;
                    }
                    blend(&mut pixels[idx..idx + 4], color, alpha);
                }
            }

            cursor_x += metrics.advance_width as i32;
        }
    }

    /// Measure the width of rendered text in pixels.
    pub fn measure_width(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        width.ceil() as u32
    }
}

fn blend(dst: &mut [u8], color: [u8; 4], coverage: u8) {
    let a = coverage as f32 / 255.0 * (color[3] as f32 / 255.0);
    let inv_a = 1.0 - a;
    for c in 0..3 {
        dst[c] = (color[c] as f32 * a + dst[c] as f32 * inv_a) as u8;
    }
    dst[3] = 255;
}
