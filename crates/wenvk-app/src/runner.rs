//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "profiling-tracy")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wenvk_gpu::GpuError;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::WenApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Width of the draw image.
    pub render_width: u32,
    /// Height of the draw image.
    pub render_height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "wenvk".to_string(),
            width: 1280,
            height: 720,
            render_width: 1280,
            render_height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the draw image dimensions.
    pub fn with_render_size(mut self, width: u32, height: u32) -> Self {
        self.render_width = width;
        self.render_height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Time budget of one frame when a target FPS is set.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|fps| *fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Install the global `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    #[cfg(feature = "profiling-tracy")]
    {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,wenvk_app=trace,wenvk_gpu=trace"));
        let tracy_layer = tracing_tracy::TracyLayer::default();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracy_layer)
            .init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

/// Run a `WenApp` with the given configuration.
///
/// Initializes logging, creates the window and the instance, and runs the event loop until the
/// application exits.
pub fn run_app<A: WenApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failed: false,
    };

    event_loop.run_app(&mut runner)?;

    if runner.failed {
        anyhow::bail!("application stopped after a fatal error");
    }
    Ok(())
}

/// Whether `error` leaves the device unusable.
fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<GpuError>()
        .is_some_and(GpuError::is_fatal)
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: WenApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failed: bool,
}

/// Internal application state.
struct AppState<A: WenApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl<A: WenApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failed = true;
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame() {
                    Ok(()) => state.ctx.window.request_redraw(),
                    Err(e) if is_fatal(&e) => {
                        error!("Fatal render error: {e:#}");
                        self.failed = true;
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                    }
                    Err(e) => error!("Render error: {e:#}"),
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.ctx.instance.mark_swapchain_dirty();
                    tracing::debug!("Window resized to {}x{}", size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let Some(state) = &mut self.state {
            state.app.on_device_event(device_id, &event);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: WenApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = AppContext::new(window, &self.config)?;
        info!("GPU: {}", ctx.instance.gpu().capabilities().summary());

        let app = A::init(&mut ctx)?;

        Ok(AppState {
            ctx,
            app,
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        })
    }
}

impl<A: WenApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = {
            let now = Instant::now();
            let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
            self.ctx.last_frame_time = now;

            if dt > 0.0 {
                let fps = 1.0 / f64::from(dt);
                self.min_fps = self.min_fps.min(fps);
                self.max_fps = self.max_fps.max(fps);
                self.fps_sum += fps;
                self.fps_samples += 1;
            }
            dt
        };

        self.app.update(&self.ctx, dt);

        if self.ctx.instance.required_swapchain_reinit() {
            let size = self.ctx.window.inner_size();
            if size.width == 0 || size.height == 0 {
                // Minimized; nothing can be presented until the window has an area again
                return Ok(());
            }
            self.ctx.instance.recreate_swapchain(size.width, size.height)?;
            self.app.on_resize(&mut self.ctx, size.width, size.height)?;
            info!("Resized to {}x{}", size.width, size.height);
        }

        let cmd = {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.begin").entered();
            self.ctx.instance.begin_frame()?
        };

        let mut frame = FrameContext::new(
            cmd,
            self.ctx.draw_image,
            dt,
            self.ctx.instance.frame_number(),
            self.ctx.instance.current_frame_index(),
        );

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record.app_render").entered();
            self.app.render(&mut self.ctx, &mut frame)?;
        }

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.end").entered();
            self.ctx
                .instance
                .end_frame(cmd, frame.draw_image, &frame.end_params)?;
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        if self.fps_samples > 0 {
            let avg_fps = self.fps_sum / self.fps_samples as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.instance.frame_number());
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.instance.wait_idle() {
            warn!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        self.app.cleanup(&mut self.ctx);

        match self.ctx.cleanup() {
            Ok(()) => info!("Cleanup complete"),
            Err(e) => error!("Cleanup failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = AppConfig::new("demo")
            .with_size(1920, 1080)
            .with_render_size(640, 360)
            .with_vsync(false)
            .with_validation(true)
            .with_target_fps(60);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!((config.render_width, config.render_height), (640, 360));
        assert!(!config.vsync);
        assert!(config.validation);
        assert_eq!(config.target_fps, Some(60));
    }

    #[test]
    fn target_frame_time() {
        assert_eq!(AppConfig::default().target_frame_time(), None);
        assert_eq!(
            AppConfig::default().with_target_fps(50).target_frame_time(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn only_device_failures_are_fatal() {
        assert!(is_fatal(&anyhow::Error::new(GpuError::DeviceLost)));
        assert!(is_fatal(&anyhow::Error::new(GpuError::Timeout {
            what: "frame fence",
            timeout_ns: 1,
        })));
        assert!(!is_fatal(&anyhow::Error::new(GpuError::InvalidState(
            "x".to_string()
        ))));
        assert!(!is_fatal(&anyhow::anyhow!("plain error")));
    }
}
