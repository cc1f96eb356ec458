use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;

use super::metrics::RollingMetrics;
use crate::capture::FrameSource;
use crate::frame::Frame;
use crate::plugin::{PluginError, SharedPlugin, UnifiedResult};

/// Pipeline name reported when no plugin is attached.
pub const PASSTHROUGH: &str = "passthrough";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// One processed frame with its result and timing.
#[derive(Debug, Clone)]
pub struct FrameReady {
    pub frame: Frame,
    pub result: UnifiedResult,
    pub fps: f64,
    pub latency_ms: f64,
    pub rolling_avg_ms: f64,
}

#[derive(Debug, Clone)]
pub enum RunnerEvent {
    FrameReady(Box<FrameReady>),
    Error(String),
    Stopped,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner is busy ({0:?})")]
    Busy(RunnerState),
    #[error("frame source is not available")]
    SourceUnavailable,
    #[error("failed to spawn runner thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("runner thread panicked")]
    WorkerPanicked,
}

type SharedState = Arc<Mutex<RunnerState>>;

fn read_state(state: &SharedState) -> RunnerState {
    *state.lock().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &SharedState, next: RunnerState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

/// Requests a cooperative stop from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    state: SharedState,
}

impl StopHandle {
    /// Takes effect at the next loop iteration. No-op unless a run is active.
    pub fn stop(&self) {
        match read_state(&self.state) {
            RunnerState::Starting | RunnerState::Running => {
                self.flag.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

/// Drives frames from a source through an optional plugin on a dedicated thread.
///
/// Events are delivered over a bounded channel. While a run is active the worker
/// owns the source; it comes back when the worker exits and is reclaimed by
/// `start`, `join` or `into_source`.
pub struct PipelineRunner<S: FrameSource + 'static> {
    source: Option<S>,
    worker: Option<JoinHandle<S>>,
    plugin: Option<SharedPlugin>,
    events: SyncSender<RunnerEvent>,
    stop_flag: Arc<AtomicBool>,
    state: SharedState,
    metrics_window: usize,
    epoch: Instant,
}

impl<S: FrameSource + 'static> PipelineRunner<S> {
    pub fn new(source: S, metrics_window: usize, channel_capacity: usize) -> (Self, Receiver<RunnerEvent>) {
        let (events, receiver) = mpsc::sync_channel(channel_capacity);
        let runner = Self {
            source: Some(source),
            worker: None,
            plugin: None,
            events,
            stop_flag: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(RunnerState::Idle)),
            metrics_window,
            epoch: Instant::now(),
        };
        (runner, receiver)
    }

    pub fn state(&self) -> RunnerState {
        read_state(&self.state)
    }

    /// `None` selects pass-through. Only allowed while idle.
    pub fn set_plugin(&mut self, plugin: Option<SharedPlugin>) -> Result<(), RunnerError> {
        let state = self.state();
        if state != RunnerState::Idle {
            return Err(RunnerError::Busy(state));
        }
        self.plugin = plugin;
        Ok(())
    }

    /// Starts a run. Returns immediately if one is already starting or running.
    ///
    /// A previous worker is joined first; call this after its `Stopped` event has
    /// been received.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        let state = self.state();
        match state {
            RunnerState::Starting | RunnerState::Running => return Ok(()),
            RunnerState::Stopping | RunnerState::Failed => return Err(RunnerError::Busy(state)),
            RunnerState::Idle => {}
        }

        self.join()?;
        let source = self.source.take().ok_or(RunnerError::SourceUnavailable)?;

        self.stop_flag.store(false, Ordering::SeqCst);
        write_state(&self.state, RunnerState::Starting);

        let worker = Worker {
            plugin: self.plugin.clone(),
            events: self.events.clone(),
            stop: Arc::clone(&self.stop_flag),
            state: Arc::clone(&self.state),
            metrics: RollingMetrics::new(self.metrics_window),
            epoch: self.epoch,
        };

        let spawned = thread::Builder::new()
            .name("pipeline-runner".to_string())
            .spawn(move || worker.run(source));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                write_state(&self.state, RunnerState::Idle);
                tracing::error!(error = %e, "failed to spawn runner thread");
                Err(RunnerError::Spawn(e))
            }
        }
    }

    /// Requests a cooperative stop; the in-flight frame finishes first.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
            state: Arc::clone(&self.state),
        }
    }

    /// Waits for the worker to exit and takes the source back.
    ///
    /// Blocks while the worker is waiting on a full channel, so keep draining
    /// events (or drop the receiver) from another thread.
    pub fn join(&mut self) -> Result<(), RunnerError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(source) => {
                self.source = Some(source);
                Ok(())
            }
            Err(_) => {
                write_state(&self.state, RunnerState::Idle);
                tracing::error!("runner thread panicked, source lost");
                Err(RunnerError::WorkerPanicked)
            }
        }
    }

    /// Stops any active run and returns the source.
    pub fn into_source(mut self) -> Option<S> {
        self.stop();
        if let Err(e) = self.join() {
            tracing::warn!(error = %e, "source not recovered");
        }
        self.source.take()
    }
}

impl<S: FrameSource + 'static> Drop for PipelineRunner<S> {
    fn drop(&mut self) {
        // The worker may be blocked on the channel; it exits on its own once the
        // receiver goes away.
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

enum Outcome {
    EndOfStream,
    StopRequested,
    ConsumerGone,
    Failed(String),
}

struct Worker {
    plugin: Option<SharedPlugin>,
    events: SyncSender<RunnerEvent>,
    stop: Arc<AtomicBool>,
    state: SharedState,
    metrics: RollingMetrics,
    epoch: Instant,
}

impl Worker {
    fn run<S: FrameSource>(mut self, mut source: S) -> S {
        let pipeline = self.pipeline_name();
        write_state(&self.state, RunnerState::Running);
        tracing::info!(pipeline = %pipeline, "pipeline started");

        let mut frames: u64 = 0;
        let looped = panic::catch_unwind(AssertUnwindSafe(|| self.frame_loop(&mut source, &mut frames)));
        let outcome = looped.unwrap_or_else(|payload| {
            Outcome::Failed(format!("pipeline worker panicked: {}", panic_message(payload.as_ref())))
        });

        match &outcome {
            Outcome::Failed(message) => {
                write_state(&self.state, RunnerState::Failed);
                tracing::error!(pipeline = %pipeline, frames, error = %message, "pipeline failed");
                let _ = self.events.send(RunnerEvent::Error(message.clone()));
            }
            Outcome::EndOfStream => tracing::info!(pipeline = %pipeline, frames, "end of stream"),
            Outcome::StopRequested => tracing::info!(pipeline = %pipeline, frames, "stop requested"),
            Outcome::ConsumerGone => tracing::debug!(pipeline = %pipeline, frames, "event receiver dropped"),
        }

        write_state(&self.state, RunnerState::Stopping);
        write_state(&self.state, RunnerState::Idle);
        let _ = self.events.send(RunnerEvent::Stopped);
        source
    }

    /// Reads, processes and emits frames until the stream ends, a stop is
    /// requested, the plugin fails or the receiver goes away.
    fn frame_loop<S: FrameSource>(&mut self, source: &mut S, frames: &mut u64) -> Outcome {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break Outcome::StopRequested;
            }

            let Some(frame) = source.read() else {
                break Outcome::EndOfStream;
            };
            let timestamp_s = self.epoch.elapsed().as_secs_f64();

            let ready = match self.plugin.as_ref() {
                None => FrameReady {
                    frame,
                    result: UnifiedResult::new(PASSTHROUGH, timestamp_s),
                    fps: 0.0,
                    latency_ms: 0.0,
                    rolling_avg_ms: 0.0,
                },
                Some(plugin) => match process_guarded(plugin, &frame, timestamp_s) {
                    Ok((annotated, result)) => {
                        let timing = self.metrics.tick();
                        FrameReady {
                            frame: annotated,
                            result,
                            fps: timing.fps,
                            latency_ms: timing.latency_ms,
                            rolling_avg_ms: self.metrics.rolling_average_ms(),
                        }
                    }
                    Err(message) => break Outcome::Failed(message),
                },
            };

            if self.events.send(RunnerEvent::FrameReady(Box::new(ready))).is_err() {
                break Outcome::ConsumerGone;
            }
            *frames += 1;
        }
    }

    fn pipeline_name(&self) -> String {
        match &self.plugin {
            None => PASSTHROUGH.to_string(),
            Some(plugin) => plugin
                .lock()
                .map(|p| p.plugin_id().to_string())
                .unwrap_or_else(|_| "<poisoned>".to_string()),
        }
    }
}

/// Runs `process` under the plugin lock, turning errors and panics into a message.
fn process_guarded(
    plugin: &SharedPlugin,
    frame: &Frame,
    timestamp_s: f64,
) -> Result<(Frame, UnifiedResult), String> {
    let mut guard = plugin.lock().map_err(|_| PluginError::Poisoned.to_string())?;
    match panic::catch_unwind(AssertUnwindSafe(|| guard.process(frame, timestamp_s))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("plugin panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetResolver;
    use crate::plugin::{Plugin, SettingSpec, Settings};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct VecSource(VecDeque<Frame>);

    impl VecSource {
        fn frames(n: u32) -> Self {
            Self((1..=n).map(|i| Frame::black(i, 1)).collect())
        }
    }

    impl FrameSource for VecSource {
        fn read(&mut self) -> Option<Frame> {
            self.0.pop_front()
        }
    }

    /// Endless source.
    struct Repeating;

    impl FrameSource for Repeating {
        fn read(&mut self) -> Option<Frame> {
            thread::sleep(Duration::from_millis(2));
            Some(Frame::black(2, 2))
        }
    }

    /// Serves `burst` frames per run, then reports end of stream once.
    struct Bursts {
        burst: usize,
        served: usize,
    }

    impl FrameSource for Bursts {
        fn read(&mut self) -> Option<Frame> {
            if self.served == self.burst {
                self.served = 0;
                return None;
            }
            self.served += 1;
            Some(Frame::black(1, 1))
        }
    }

    /// Panics on the given read.
    struct PanickingSource {
        reads: usize,
        panic_on: usize,
    }

    impl FrameSource for PanickingSource {
        fn read(&mut self) -> Option<Frame> {
            self.reads += 1;
            if self.reads == self.panic_on {
                panic!("device vanished");
            }
            Some(Frame::black(1, 1))
        }
    }

    /// Echoes the frame, failing or panicking on the given call number.
    struct Scripted {
        calls: Arc<AtomicUsize>,
        fail_on: Option<usize>,
        panic_on: Option<usize>,
    }

    impl Plugin for Scripted {
        fn plugin_id(&self) -> &'static str {
            "scripted"
        }

        fn display_name(&self) -> &'static str {
            "Scripted"
        }

        fn settings_schema(&self) -> &'static [SettingSpec] {
            &[]
        }

        fn init(&mut self, _: &Settings, _: &AssetResolver) -> Result<(), PluginError> {
            Ok(())
        }

        fn process(&mut self, frame: &Frame, ts: f64) -> Result<(Frame, UnifiedResult), PluginError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err(PluginError::model(format!("boom on call {call}")));
            }
            if self.panic_on == Some(call) {
                panic!("kaboom");
            }
            let result = UnifiedResult::new("scripted", ts).with_metadata("call", call);
            Ok((frame.clone(), result))
        }

        fn close(&mut self) {}

        fn is_initialized(&self) -> bool {
            true
        }
    }

    fn scripted(fail_on: Option<usize>, panic_on: Option<usize>) -> (SharedPlugin, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let plugin: SharedPlugin = Arc::new(Mutex::new(Box::new(Scripted {
            calls: Arc::clone(&calls),
            fail_on,
            panic_on,
        })));
        (plugin, calls)
    }

    /// Collects events up to and including `Stopped`.
    fn drain(rx: &Receiver<RunnerEvent>) -> Vec<RunnerEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(TIMEOUT).expect("runner went silent");
            let stopped = matches!(event, RunnerEvent::Stopped);
            events.push(event);
            if stopped {
                return events;
            }
        }
    }

    fn frames_of(events: &[RunnerEvent]) -> Vec<&FrameReady> {
        events
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::FrameReady(ready) => Some(ready.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_every_frame_emitted_in_order_then_stopped() {
        let (plugin, _) = scripted(None, None);
        let (mut runner, rx) = PipelineRunner::new(VecSource::frames(6), 30, 2);
        runner.set_plugin(Some(plugin)).unwrap();
        runner.start().unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 7);
        assert!(matches!(events.last(), Some(RunnerEvent::Stopped)));

        let frames = frames_of(&events);
        let widths: Vec<u32> = frames.iter().map(|f| f.frame.width()).collect();
        assert_eq!(widths, vec![1, 2, 3, 4, 5, 6]);

        let timestamps: Vec<f64> = frames.iter().map(|f| f.result.timestamp_s()).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(frames[0].fps, 0.0);
        assert_eq!(frames[0].latency_ms, 0.0);

        assert_eq!(runner.state(), RunnerState::Idle);
        runner.join().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failure_on_fifth_call() {
        let (plugin, calls) = scripted(Some(5), None);
        let (mut runner, rx) = PipelineRunner::new(VecSource::frames(10), 30, 2);
        runner.set_plugin(Some(plugin)).unwrap();
        runner.start().unwrap();

        let events = drain(&rx);
        assert_eq!(frames_of(&events).len(), 4);

        let errors: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("boom on call 5"));
        assert!(matches!(events[4], RunnerEvent::Error(_)));
        assert!(matches!(events[5], RunnerEvent::Stopped));

        runner.join().unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_plugin_panic_is_reported() {
        let (plugin, _) = scripted(None, Some(2));
        let (mut runner, rx) = PipelineRunner::new(VecSource::frames(4), 30, 2);
        runner.set_plugin(Some(Arc::clone(&plugin))).unwrap();
        runner.start().unwrap();

        let events = drain(&rx);
        assert_eq!(frames_of(&events).len(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunnerEvent::Error(m) if m.contains("kaboom"))));

        runner.join().unwrap();
        assert!(plugin.lock().is_ok());
    }

    #[test]
    fn test_source_panic_reports_and_returns_to_idle() {
        let (plugin, _) = scripted(None, None);
        let source = PanickingSource {
            reads: 0,
            panic_on: 3,
        };
        let (mut runner, rx) = PipelineRunner::new(source, 30, 2);
        runner.set_plugin(Some(plugin)).unwrap();
        runner.start().unwrap();

        let events = drain(&rx);
        assert_eq!(events.len(), 4);
        assert_eq!(frames_of(&events).len(), 2);
        assert!(matches!(&events[2], RunnerEvent::Error(m) if m.contains("device vanished")));
        assert!(matches!(events[3], RunnerEvent::Stopped));

        runner.join().unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);

        // the source comes back and a new run starts
        runner.start().unwrap();
        assert!(matches!(rx.recv_timeout(TIMEOUT), Ok(RunnerEvent::FrameReady(_))));
        runner.stop();
        drain(&rx);
        let source = runner.into_source().unwrap();
        assert!(source.reads > 3);
    }

    #[test]
    fn test_passthrough_without_plugin() {
        let (mut runner, rx) = PipelineRunner::new(VecSource::frames(3), 30, 1);
        runner.start().unwrap();

        let events = drain(&rx);
        let frames = frames_of(&events);
        assert_eq!(frames.len(), 3);
        for (i, ready) in frames.iter().enumerate() {
            assert_eq!(ready.frame, Frame::black(i as u32 + 1, 1));
            assert_eq!(ready.result.pipeline(), PASSTHROUGH);
            assert!(ready.result.detections().is_empty());
            assert!(ready.result.landmarks().is_empty());
            assert_eq!((ready.fps, ready.latency_ms, ready.rolling_avg_ms), (0.0, 0.0, 0.0));
        }
    }

    #[test]
    fn test_stop_ends_endless_run() {
        let (plugin, _) = scripted(None, None);
        let (mut runner, rx) = PipelineRunner::new(Repeating, 30, 2);
        runner.set_plugin(Some(plugin)).unwrap();
        runner.start().unwrap();

        for _ in 0..3 {
            assert!(matches!(rx.recv_timeout(TIMEOUT), Ok(RunnerEvent::FrameReady(_))));
        }
        let handle = runner.stop_handle();
        handle.stop();

        let events = drain(&rx);
        assert!(events.iter().all(|e| !matches!(e, RunnerEvent::Error(_))));
        runner.join().unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[test]
    fn test_set_plugin_while_running_is_busy() {
        let (plugin, _) = scripted(None, None);
        let (mut runner, rx) = PipelineRunner::new(Repeating, 30, 2);
        runner.start().unwrap();

        let err = runner.set_plugin(Some(Arc::clone(&plugin))).unwrap_err();
        assert!(matches!(err, RunnerError::Busy(_)));

        runner.stop();
        drain(&rx);
        runner.join().unwrap();
        runner.set_plugin(Some(plugin)).unwrap();
    }

    #[test]
    fn test_start_twice_runs_one_worker() {
        let (mut runner, rx) = PipelineRunner::new(Repeating, 30, 2);
        runner.start().unwrap();
        runner.start().unwrap();

        runner.stop();
        let events = drain(&rx);
        assert_eq!(events.iter().filter(|e| matches!(e, RunnerEvent::Stopped)).count(), 1);
        runner.join().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_restart_reclaims_source() {
        let (plugin, calls) = scripted(None, None);
        let (mut runner, rx) = PipelineRunner::new(Bursts { burst: 3, served: 0 }, 30, 4);
        runner.set_plugin(Some(plugin)).unwrap();

        runner.start().unwrap();
        let first = drain(&rx);
        runner.start().unwrap();
        let second = drain(&rx);

        assert_eq!(frames_of(&first).len(), 3);
        assert_eq!(frames_of(&second).len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        // one epoch per runner: timestamps keep increasing across runs
        let last_first = frames_of(&first)[2].result.timestamp_s();
        let first_second = frames_of(&second)[0].result.timestamp_s();
        assert!(last_first <= first_second);

        // metrics window restarts with each run
        assert_eq!(frames_of(&second)[0].latency_ms, 0.0);
    }

    #[test]
    fn test_dropped_receiver_ends_run() {
        let (mut runner, rx) = PipelineRunner::new(Repeating, 30, 1);
        drop(rx);
        runner.start().unwrap();
        runner.join().unwrap();
        assert_eq!(runner.state(), RunnerState::Idle);
        assert!(runner.into_source().is_some());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut runner, rx) = PipelineRunner::new(VecSource::frames(2), 30, 2);
        runner.stop();
        runner.start().unwrap();
        assert_eq!(frames_of(&drain(&rx)).len(), 2);
    }
}
