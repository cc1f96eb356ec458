pub mod assets;
pub mod capture;
pub mod config;
pub mod draw;
pub mod export;
pub mod frame;
pub mod pipeline;
pub mod plugin;
pub mod plugins;

pub use capture::{CaptureSource, FrameSource};
pub use frame::Frame;
pub use pipeline::{FrameReady, PipelineRunner, RollingMetrics, RunnerEvent, RunnerState};
pub use plugin::{Plugin, PluginError, PluginRegistry, SharedPlugin, UnifiedResult};
