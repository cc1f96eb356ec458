use opencv::prelude::*;
use opencv::videoio::VideoCapture;

use super::CAMERA_BACKEND;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub index: i32,
    pub name: String,
}

/// Probes indices `0..max_probe` with the backend `open_camera` uses.
pub fn list_cameras(max_probe: i32) -> Vec<CameraInfo> {
    let mut cameras = Vec::new();

    for index in 0..max_probe.max(0) {
        let mut cap = match VideoCapture::new(index, CAMERA_BACKEND) {
            Ok(cap) => cap,
            Err(e) => {
                tracing::trace!(camera = index, error = %e, "camera probe failed");
                continue;
            }
        };

        if cap.is_opened().unwrap_or(false) {
            cameras.push(CameraInfo {
                index,
                name: format!("Camera {index}"),
            });
        }
        let _ = cap.release();
    }

    tracing::debug!(count = cameras.len(), "camera probe complete");
    cameras
}
