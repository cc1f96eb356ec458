use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use framepipe::assets::AssetResolver;
use framepipe::capture::{list_cameras, CaptureSource};
use framepipe::config::{Config, ExportConfig, DEFAULT_CONFIG_PATH};
use framepipe::export::{self, ExportError, Recorder};
use framepipe::pipeline::{FrameReady, PipelineRunner, RunnerEvent, StopHandle};
use framepipe::plugin::{spawn_init, PluginRegistry, Settings};

const STATS_EVERY: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("framepipe=debug".parse()?))
        .init();

    let config = load_config()?;
    let assets = Arc::new(AssetResolver::new(&config.assets));

    let registry = PluginRegistry::discover();
    for failure in registry.failures() {
        tracing::warn!(plugin = %failure.id, reason = %failure.reason, "plugin unavailable");
    }
    tracing::info!(plugins = ?registry.ids(), "plugins discovered");

    let mut source = CaptureSource::new();
    match &config.capture.file {
        Some(path) => source.open_file(path)?,
        None => {
            let cameras = list_cameras(config.capture.probe_limit);
            for camera in &cameras {
                tracing::info!(camera = camera.index, name = %camera.name, "camera available");
            }
            source.open_camera(config.capture.camera)?;
        }
    }
    let fps = source.get_fps();
    let (width, height) = source.get_size();
    tracing::info!(fps, width, height, "capture ready");

    let plugin = match &config.pipeline.plugin {
        Some(id) => {
            let plugin = registry.get(id)?;
            let settings = {
                let guard = plugin.lock().map_err(|_| "plugin lock poisoned")?;
                Settings::resolve(guard.settings_schema(), &config.pipeline.settings)?
            };
            spawn_init(Arc::clone(&plugin), settings, Arc::clone(&assets)).await??;
            Some(plugin)
        }
        None => {
            tracing::info!("no plugin configured, running pass-through");
            None
        }
    };

    let (mut runner, events) = PipelineRunner::new(
        source,
        config.pipeline.metrics_window,
        config.pipeline.channel_capacity,
    );
    runner.set_plugin(plugin.clone())?;
    runner.start()?;

    let stop = runner.stop_handle();
    let mut consumer = tokio::task::spawn_blocking({
        let stop = stop.clone();
        let export = config.export.clone();
        let max_frames = config.pipeline.max_frames;
        move || consume(events, stop, export, fps, max_frames)
    });

    let finished = tokio::select! {
        joined = &mut consumer => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(joined) => joined?,
        None => {
            tracing::info!("shutdown signal received");
            stop.stop();
            consumer.await?
        }
    };

    let source = tokio::task::spawn_blocking(move || runner.into_source()).await?;
    if let Some(plugin) = plugin {
        if let Ok(mut plugin) = plugin.lock() {
            plugin.close();
        }
    }
    if let Some(mut source) = source {
        source.close();
    }

    match summary {
        Ok(frames) => tracing::info!(frames, "shutdown complete"),
        Err(e) => tracing::error!(error = %e, "export failed"),
    }
    Ok(())
}

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!(path = %path, "loading config");
            Ok(Config::load_from(path)?)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok(Config::load()?),
        None => {
            tracing::info!("no {DEFAULT_CONFIG_PATH}, using defaults");
            Ok(Config::default())
        }
    }
}

/// Drains runner events until `Stopped`, recording and exporting as configured.
fn consume(
    events: Receiver<RunnerEvent>,
    stop: StopHandle,
    export: ExportConfig,
    fps: f64,
    max_frames: Option<u64>,
) -> Result<u64, ExportError> {
    let mut recorder: Option<Recorder> = None;
    let mut last: Option<Box<FrameReady>> = None;
    let mut frames: u64 = 0;

    for event in events.iter() {
        match event {
            RunnerEvent::FrameReady(ready) => {
                frames += 1;
                tracing::trace!(
                    frame = frames,
                    detections = ready.result.detections().len(),
                    latency_ms = ready.latency_ms,
                    "frame ready"
                );

                if let Some(path) = &export.record {
                    if recorder.is_none() {
                        let size = (ready.frame.width(), ready.frame.height());
                        recorder = Some(Recorder::create(path, fps, size)?);
                    }
                    if let Some(recorder) = recorder.as_mut() {
                        recorder.write(&ready.frame)?;
                    }
                }

                if frames % STATS_EVERY == 0 {
                    tracing::info!(
                        frames,
                        fps = format!("{:.1}", ready.fps),
                        avg_ms = format!("{:.1}", ready.rolling_avg_ms),
                        result = %ready.result.summary(),
                        "pipeline stats"
                    );
                }
                if max_frames.is_some_and(|max| frames >= max) {
                    stop.stop();
                }
                last = Some(ready);
            }
            RunnerEvent::Error(message) => {
                tracing::error!(error = %message, "pipeline error");
            }
            RunnerEvent::Stopped => break,
        }
    }

    if let Some(recorder) = recorder {
        recorder.finish()?;
    }
    if let Some(ready) = &last {
        if let Some(path) = &export.results_json {
            export::save_results_json(path, &ready.result)?;
        }
        if let Some(path) = &export.snapshot {
            export::save_frame(path, &ready.frame)?;
        }
        tracing::info!(result = %ready.result.summary(), "last result");
    }
    Ok(frames)
}
