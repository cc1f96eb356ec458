mod metrics;
mod runner;

pub use metrics::{RollingMetrics, TimingSample, DEFAULT_WINDOW};
pub use runner::{
    FrameReady, PipelineRunner, RunnerError, RunnerEvent, RunnerState, StopHandle, PASSTHROUGH,
};
