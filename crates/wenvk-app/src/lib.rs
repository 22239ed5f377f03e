//! Application framework for the wenvk renderer.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Window creation and management
//! - Instance initialization and logging setup
//! - Swapchain recreation when the window changes
//! - The begin/end frame loop and frame pacing
//!
//! # Example
//!
//! ```no_run
//! use wenvk_app::{run_app, AppConfig, AppContext, FrameContext, WenApp};
//!
//! struct MyApp;
//!
//! impl WenApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &mut AppContext, _frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::WenApp;
pub use context::{AppContext, DRAW_IMAGE_FORMAT};
pub use frame::FrameContext;
pub use runner::{init_logging, run_app, AppConfig};

// Re-export commonly used types for convenience
pub use wenvk_gpu::{EndFrameParams, Instance, TextureId};
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
