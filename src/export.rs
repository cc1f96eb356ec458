//! Snapshot, result and recording export.

use std::path::{Path, PathBuf};

use opencv::core::{Size, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use thiserror::Error;

use crate::frame::{Frame, FrameError};
use crate::plugin::UnifiedResult;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("path is not valid utf-8: {0:?}")]
    InvalidPath(PathBuf),
    #[error("could not write {0}")]
    Write(PathBuf),
    #[error("frame is {actual:?}, recording is {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

fn path_str(path: &Path) -> Result<&str, ExportError> {
    path.to_str()
        .ok_or_else(|| ExportError::InvalidPath(path.to_path_buf()))
}

/// Writes `frame` as an image; the format follows the extension (PNG recommended).
pub fn save_frame(path: impl AsRef<Path>, frame: &Frame) -> Result<(), ExportError> {
    let path = path.as_ref();
    let mat = frame.to_mat()?;
    if !imgcodecs::imwrite(path_str(path)?, &mat, &Vector::new())? {
        return Err(ExportError::Write(path.to_path_buf()));
    }
    tracing::info!(path = %path.display(), "frame saved");
    Ok(())
}

pub fn save_results_json(path: impl AsRef<Path>, result: &UnifiedResult) -> Result<(), ExportError> {
    let path = path.as_ref();
    std::fs::write(path, result.to_json_pretty()?)?;
    tracing::info!(path = %path.display(), pipeline = %result.pipeline(), "results saved");
    Ok(())
}

fn fourcc_for(path: &Path) -> opencv::Result<i32> {
    let is_avi = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("avi"));
    if is_avi {
        VideoWriter::fourcc('M', 'J', 'P', 'G')
    } else {
        VideoWriter::fourcc('m', 'p', '4', 'v')
    }
}

/// Video file writer for annotated frames at a fixed size and rate.
pub struct Recorder {
    writer: VideoWriter,
    path: PathBuf,
    size: (u32, u32),
    frames: u64,
}

impl Recorder {
    pub fn create(path: impl AsRef<Path>, fps: f64, size: (u32, u32)) -> Result<Self, ExportError> {
        let path = path.as_ref();
        let fps = if fps > 0.0 { fps } else { crate::capture::DEFAULT_FPS };
        let writer = VideoWriter::new(
            path_str(path)?,
            fourcc_for(path)?,
            fps,
            Size::new(size.0 as i32, size.1 as i32),
            true,
        )?;
        if !writer.is_opened()? {
            return Err(ExportError::Write(path.to_path_buf()));
        }

        tracing::info!(path = %path.display(), fps, width = size.0, height = size.1, "recording started");
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            size,
            frames: 0,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), ExportError> {
        let actual = (frame.width(), frame.height());
        if actual != self.size {
            return Err(ExportError::FrameSize {
                expected: self.size,
                actual,
            });
        }
        self.writer.write(&frame.to_mat()?)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the file, returning the number of frames written.
    pub fn finish(mut self) -> Result<u64, ExportError> {
        self.writer.release()?;
        tracing::info!(path = %self.path.display(), frames = self.frames, "recording finished");
        Ok(self.frames)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.writer.is_opened().unwrap_or(false) {
            let _ = self.writer.release();
        }
    }
}
