mod devices;
mod source;

pub use devices::{list_cameras, CameraInfo};
pub use source::{CaptureError, CaptureSource, DEFAULT_FPS};

use crate::frame::Frame;

/// Anything the runner can pull frames from.
///
/// `None` means the stream is over: end of file, device error, or nothing open.
pub trait FrameSource: Send {
    fn read(&mut self) -> Option<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Option<Frame> {
        (**self).read()
    }
}

/// Backend used both to enumerate and to open cameras so indices agree.
#[cfg(target_os = "windows")]
pub(crate) const CAMERA_BACKEND: i32 = opencv::videoio::CAP_DSHOW;
#[cfg(target_os = "linux")]
pub(crate) const CAMERA_BACKEND: i32 = opencv::videoio::CAP_V4L2;
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub(crate) const CAMERA_BACKEND: i32 = opencv::videoio::CAP_ANY;
