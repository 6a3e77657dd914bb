// =============================================================================
// VULKAN TRIANGLE - one fixed pipeline, one triangle, strictly serialized frames
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, redraw requests)              │
// │    └── Renderer                                                 │
// │          ├── PresentationContext (instance, debug, surface)     │
// │          ├── LogicalDevice (device + graphics/present queue)    │
// │          ├── Swapchain (images, views, render pass, framebuffers)│
// │          ├── PipelineResources (layout + pipeline)              │
// │          └── FrameRenderer (command pool, semaphores)           │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Acquire swapchain image (signals "image acquired")
// 2. Record a one-shot command buffer: clear, set viewport, draw 3 vertices
// 3. Submit (waits "image acquired", signals "render complete")
// 4. Present (waits "render complete")
// 5. Wait for the device to go idle, free the command buffer
//
// =============================================================================

mod backend;
mod config;
mod shaders;

use anyhow::{Context, Result};
use ash::vk;
use backend::{FrameError, FrameStatus, LogSink, Renderer, RendererDesc, SurfaceExtent};
use config::Config;
use raw_window_handle::HasDisplayHandle;
use shaders::{ShaderDirectory, ShaderSource};
use std::ffi::CStr;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, config_error) = Config::load();

    init_logging(&config);
    match config_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", config::CONFIG_PATH, e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!("Starting Vulkan triangle");
    log::info!(
        "Window: {}x{}, present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Fatal errors are stashed by the event handler and surfaced here.
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// `RUST_LOG` overrides the level from the config file
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

impl SurfaceExtent for Window {
    fn pixel_extent(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: the renderer is declared before the window so it is dropped
/// first; its surface must not outlive the window.
struct App {
    config: Config,

    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// First fatal error; ends the event loop and becomes main's result
    error: Option<anyhow::Error>,

    /// Zero-sized window - skip rendering
    is_minimized: bool,
    reported_suboptimal: bool,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            error: None,
            is_minimized: false,
            reported_suboptimal: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let shader_source = ShaderDirectory::new(&self.config.shaders.directory);
        let vertex_shader = shader_source.load(&self.config.shaders.vertex)?;
        let fragment_shader = shader_source.load(&self.config.shaders.fragment)?;

        let required_extensions = required_instance_extensions(window)?;

        // Validation only in debug builds, and only if the config allows it
        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;

        let renderer = Renderer::new(
            window,
            RendererDesc {
                app_name: &self.config.window.title,
                required_extensions: &required_extensions,
                enable_validation,
                message_sink: Box::new(LogSink),
                present_mode: self.config.present_mode(),
                clear_color: self.config.graphics.clear_color,
                acquire_timeout: self.config.acquire_timeout(),
                vertex_shader: &vertex_shader,
                fragment_shader: &fragment_shader,
            },
        )
        .context("Failed to initialize Vulkan")?;

        let extent = renderer.extent();
        log::info!(
            "Rendering at {}x{} with {} swapchain images",
            extent.width,
            extent.height,
            renderer.image_count()
        );
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_minimized || self.error.is_some() {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render_frame() {
            Ok(FrameStatus::Presented) => self.update_fps(),
            Ok(FrameStatus::Suboptimal) => {
                if !self.reported_suboptimal {
                    log::warn!("Swapchain is suboptimal for the surface; continuing");
                    self.reported_suboptimal = true;
                }
                self.update_fps();
            }
            // No swapchain recreation: any frame failure ends the loop.
            Err(e) => self.fail(event_loop, frame_failure(e)),
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

fn frame_failure(e: FrameError) -> anyhow::Error {
    let context = if e.is_out_of_date() {
        "Window surface changed and the swapchain cannot be recreated".to_string()
    } else {
        format!("Frame failed during {}", e.stage())
    };
    anyhow::Error::new(e).context(context)
}

/// Platform surface extensions for the window's display
fn required_instance_extensions(window: &Window) -> Result<Vec<&'static CStr>> {
    let display = window
        .display_handle()
        .context("Failed to get display handle")?
        .as_raw();
    let names = ash_window::enumerate_required_extensions(display)
        .context("Windowing system has no Vulkan surface support")?;

    // Names are static strings owned by ash-window.
    Ok(names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // The swapchain is never recreated, so the size is fixed.
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.is_minimized = size.width == 0 || size.height == 0;
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear the GPU side down while the window still exists.
        if let Some(renderer) = self.renderer.take() {
            log::info!("Presented {} frames", renderer.frames_presented());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::debug::{MessageSeverity, MessageSink};
    use crate::backend::error::FrameStage;
    use std::sync::Mutex;

    struct Recorder(Arc<Mutex<Vec<(MessageSeverity, String)>>>);

    impl MessageSink for Recorder {
        fn on_message(&self, severity: MessageSeverity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_owned()));
        }
    }

    #[test]
    fn frame_failures_name_what_went_wrong() {
        let out_of_date = frame_failure(FrameError::OutOfDate(FrameStage::Present));
        assert!(format!("{:#}", out_of_date).starts_with("Window surface changed"));

        let lost = frame_failure(FrameError::DeviceLost(FrameStage::Submit));
        assert!(format!("{:#}", lost).starts_with("Frame failed during queue submission"));
    }

    /// Startup, one frame, teardown: the validation layer must stay silent,
    /// which includes its report of objects still alive at device and
    /// instance destruction.
    #[test]
    #[cfg(target_os = "linux")]
    #[ignore = "needs a display, a Vulkan driver, the validation layer and compiled shaders"]
    fn one_frame_cycle_is_validation_clean() {
        use winit::platform::x11::EventLoopBuilderExtX11;

        let mut builder = EventLoop::builder();
        EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
        let event_loop = builder.build().unwrap();
        #[allow(deprecated)]
        let window = event_loop
            .create_window(
                WindowAttributes::default()
                    .with_inner_size(winit::dpi::PhysicalSize::new(800, 600))
                    .with_resizable(false),
            )
            .unwrap();

        let shaders = ShaderDirectory::new("shaders");
        let vertex_shader = shaders.load("triangle.vert.spv").unwrap();
        let fragment_shader = shaders.load("triangle.frag.spv").unwrap();
        let required_extensions = required_instance_extensions(&window).unwrap();

        let messages = Arc::new(Mutex::new(Vec::new()));
        {
            let mut renderer = Renderer::new(
                &window,
                RendererDesc {
                    app_name: "validation cycle",
                    required_extensions: &required_extensions,
                    enable_validation: true,
                    message_sink: Box::new(Recorder(messages.clone())),
                    present_mode: vk::PresentModeKHR::FIFO,
                    clear_color: [0.0, 0.0, 0.0, 1.0],
                    acquire_timeout: Some(std::time::Duration::from_secs(5)),
                    vertex_shader: &vertex_shader,
                    fragment_shader: &fragment_shader,
                },
            )
            .unwrap();

            renderer.render_frame().unwrap();
            assert_eq!(renderer.frames_presented(), 1);
        }

        let messages = messages.lock().unwrap();
        assert!(messages.is_empty(), "validation reported: {:?}", messages);
    }
}
