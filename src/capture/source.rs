use std::path::{Path, PathBuf};

use opencv::core::Mat;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use thiserror::Error;

use super::{FrameSource, CAMERA_BACKEND};
use crate::frame::Frame;

/// Reported when the container or device does not expose a frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {0}")]
    Open(String),
    #[error("path is not valid utf-8: {0:?}")]
    InvalidPath(PathBuf),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Camera-by-index or file-by-path, with at most one handle open.
pub struct CaptureSource {
    cap: Option<VideoCapture>,
    source_path: Option<PathBuf>,
    camera_index: i32,
    scratch: Mat,
}

impl CaptureSource {
    pub fn new() -> Self {
        Self {
            cap: None,
            source_path: None,
            camera_index: 0,
            scratch: Mat::default(),
        }
    }

    pub fn open_camera(&mut self, index: i32) -> Result<(), CaptureError> {
        self.close();
        self.camera_index = index;

        let cap = VideoCapture::new(index, CAMERA_BACKEND)?;
        if !cap.is_opened()? {
            return Err(CaptureError::Open(format!("camera #{index}")));
        }

        self.cap = Some(cap);
        tracing::info!(camera = index, "camera opened");
        Ok(())
    }

    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), CaptureError> {
        self.close();
        let path = path.as_ref();
        self.source_path = Some(path.to_path_buf());

        let path_str = path
            .to_str()
            .ok_or_else(|| CaptureError::InvalidPath(path.to_path_buf()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(CaptureError::Open(path.display().to_string()));
        }

        self.cap = Some(cap);
        tracing::info!(path = %path.display(), "video file opened");
        Ok(())
    }

    /// Releases the current handle. No-op when nothing is open.
    pub fn close(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(e) = cap.release() {
                tracing::warn!(error = %e, "failed to release capture");
            }
            tracing::debug!("capture released");
        }
        self.source_path = None;
    }

    pub fn is_opened(&self) -> bool {
        self.cap
            .as_ref()
            .map(|c| c.is_opened().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn is_camera(&self) -> bool {
        self.source_path.is_none()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn camera_index(&self) -> i32 {
        self.camera_index
    }

    pub fn get_fps(&self) -> f64 {
        self.cap
            .as_ref()
            .and_then(|c| c.get(videoio::CAP_PROP_FPS).ok())
            .filter(|fps| *fps > 0.0)
            .unwrap_or(DEFAULT_FPS)
    }

    pub fn get_size(&self) -> (u32, u32) {
        let Some(cap) = self.cap.as_ref() else {
            return (0, 0);
        };
        let w = cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0);
        let h = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0);
        (w.max(0.0) as u32, h.max(0.0) as u32)
    }
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for CaptureSource {
    fn read(&mut self) -> Option<Frame> {
        let cap = self.cap.as_mut()?;

        match cap.read(&mut self.scratch) {
            Ok(true) if !self.scratch.empty() => {}
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "capture read failed");
                return None;
            }
        }

        match Frame::from_mat(&self.scratch) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "unsupported frame from capture");
                None
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}
