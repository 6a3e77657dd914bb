// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Every creation call is checked and turned into
// a typed error; frame-time failures keep the stage they happened in.

pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod renderer;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use debug::LogSink;
pub use error::{FrameError, SetupError};
pub use frame::FrameStatus;
pub use renderer::{Renderer, RendererDesc};
pub use swapchain::SurfaceExtent;
