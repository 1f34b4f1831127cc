use anyhow::{Context, Result};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Offscreen device for recording. Falls back to a software adapter so
    /// headless machines can still render.
    pub fn headless(label: &str) -> Result<Self> {
        pollster::block_on(Self::open(label))
    }

    async fn open(label: &str) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let mut adapter = None;
        for force_fallback_adapter in [false, true] {
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter,
                })
                .await;
            if adapter.is_some() {
                break;
            }
            if !force_fallback_adapter {
                log::warn!("No hardware GPU adapter, trying software fallback");
            }
        }
        let adapter = adapter.context("No GPU adapter available, hardware or software")?;

        let info = adapter.get_info();
        log::info!("Rendering on {} ({:?}, {:?})", info.name, info.backend, info.device_type);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(label),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    ..Default::default()
                },
                None,
            )
            .await
            .with_context(|| format!("Failed to open GPU device for {}", label))?;

        Ok(Self { device, queue })
    }
}
