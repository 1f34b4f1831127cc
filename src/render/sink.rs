use anyhow::Result;
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::frame::{FrameRenderer, MeshDraw, TEXTURE_FORMAT};
use super::geometry::{MeshBuffers, INDICES};
use super::gpu::GpuContext;
use super::pipeline::{MeshPipeline, MeshUniforms};
use super::text::TextOverlay;
use super::visual::VisualState;
use crate::encode::ffmpeg::{EncoderSettings, FfmpegEncoder};

/// Consumes the published values once per display refresh.
pub trait FrameSink {
    fn present(&mut self, visual: &VisualState, angle: f32, now: Instant) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Headless surface: reports what would be on screen.
#[derive(Default)]
pub struct LogSink {
    last_track: Option<String>,
    last_segment: Option<usize>,
}

impl FrameSink for LogSink {
    fn present(&mut self, visual: &VisualState, _angle: f32, now: Instant) -> Result<()> {
        if visual.track_id != self.last_track {
            self.last_track = visual.track_id.clone();
            if !visual.track_label.is_empty() {
                log::info!("Visualizing {} ({})", visual.track_label, visual.color);
            }
        }
        if visual.segment_index != self.last_segment {
            self.last_segment = visual.segment_index;
            if let Some(index) = visual.segment_index {
                log::debug!(
                    "{} segment {} color {} spin {:.2}",
                    visual.progress_label(now),
                    index,
                    visual.color,
                    visual.rotation_rate
                );
            }
        }
        Ok(())
    }
}

pub struct RecordingOptions<'a> {
    pub output: &'a Path,
    pub encoder: EncoderSettings<'a>,
    pub font: Option<&'a [u8]>,
    pub show_time: bool,
    pub show_title: bool,
    pub total_frames: Option<u64>,
}

/// Offscreen wgpu renderer piping frames to ffmpeg.
pub struct RecordingSink {
    gpu: GpuContext,
    renderer: FrameRenderer,
    pipeline: MeshPipeline,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    encoder: Option<FfmpegEncoder>,
    overlay: Option<TextOverlay>,
    show_time: bool,
    show_title: bool,
    progress: Option<ProgressBar>,
    uploaded: Option<Arc<MeshBuffers>>,
}

impl RecordingSink {
    pub fn new(opts: RecordingOptions<'_>) -> Result<Self> {
        let width = opts.encoder.width;
        let height = opts.encoder.height;

        log::info!("Initializing GPU...");
        let gpu = GpuContext::headless("chromasync_recorder")?;
        let renderer = FrameRenderer::new(&gpu, width, height);
        let pipeline = MeshPipeline::new(&gpu.device, TEXTURE_FORMAT)?;

        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_uniforms"),
            size: std::mem::size_of::<MeshUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vertex_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_vertices"),
            size: std::mem::size_of::<[f32; 36]>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let index_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_indices"),
            size: std::mem::size_of_val(&INDICES) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // Topology never changes: upload once.
        gpu.queue.write_buffer(&index_buffer, 0, bytemuck::cast_slice(&INDICES));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mesh_bind_group"),
            layout: &pipeline.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let overlay = match opts.font {
            Some(bytes) if opts.show_time || opts.show_title => {
                let shorter = width.min(height) as f32;
                Some(TextOverlay::new((shorter * 0.046).max(18.0), bytes)?)
            }
            _ => None,
        };
        if overlay.is_none() && (opts.show_time || opts.show_title) {
            log::warn!("Text overlay requested but no font configured (--font / --font-url)");
        }

        let encoder = FfmpegEncoder::new(opts.output, &opts.encoder)?;

        let progress = opts.total_frames.map(|n| {
            let pb = ProgressBar::new(n);
            if let Ok(style) = indicatif::ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        });

        Ok(Self {
            gpu,
            renderer,
            pipeline,
            uniform_buffer,
            vertex_buffer,
            index_buffer,
            bind_group,
            encoder: Some(encoder),
            overlay,
            show_time: opts.show_time,
            show_title: opts.show_title,
            progress,
            uploaded: None,
        })
    }

    fn draw_overlay(&self, pixels: &mut [u8], visual: &VisualState, now: Instant) {
        let Some(ref overlay) = self.overlay else {
            return;
        };
        let (width, height) = (self.renderer.width, self.renderer.height);
        let color = visual.color.to_rgba8(220);
        let margin = (width.min(height) as f32 * 0.07) as u32;

        if self.show_title && !visual.track_label.is_empty() {
            let tw = overlay.measure_width(&visual.track_label);
            let tx = width.saturating_sub(margin + tw);
            overlay.composite(pixels, width, height, &visual.track_label, tx, margin, color);
        }
        if self.show_time && visual.track_id.is_some() {
            let label = visual.progress_label(now);
            let tw = overlay.measure_width(&label);
            let tx = width.saturating_sub(margin + tw);
            let ty = height.saturating_sub(margin + overlay.line_height());
            overlay.composite(pixels, width, height, &label, tx, ty, color);
        }
    }
}

impl FrameSink for RecordingSink {
    fn present(&mut self, visual: &VisualState, angle: f32, now: Instant) -> Result<()> {
        let stale = self
            .uploaded
            .as_ref()
            .map_or(true, |m| !Arc::ptr_eq(m, &visual.mesh));
        if stale {
            self.gpu
                .queue
                .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&visual.mesh.vertices));
            self.uploaded = Some(Arc::clone(&visual.mesh));
        }

        let uniforms = MeshUniforms::new(visual.color, angle, self.renderer.width, self.renderer.height);
        self.gpu
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let draw = MeshDraw {
            pipeline: &self.pipeline.pipeline,
            bind_group: &self.bind_group,
            vertex_buffer: &self.vertex_buffer,
            index_buffer: &self.index_buffer,
            index_count: INDICES.len() as u32,
        };
        let mut pixels = self
            .renderer
            .render_and_readback(&self.gpu, &draw, wgpu::Color { r: 0.02, g: 0.02, b: 0.03, a: 1.0 })?;

        self.draw_overlay(&mut pixels, visual, now);

        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write_frame(&pixels)?;
        }
        if let Some(ref pb) = self.progress {
            pb.inc(1);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(pb) = self.progress.take() {
            pb.finish_with_message("Recording complete");
        }
        if let Some(encoder) = self.encoder.take() {
            log::info!("Finishing encoding...");
            encoder.finish()?;
        }
        Ok(())
    }
}
