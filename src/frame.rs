use opencv::core::{Mat, CV_8UC3};
use opencv::prelude::*;
use thiserror::Error;

const BGR_CHANNELS: usize = 3;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame data length mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("unsupported mat layout: type {0}, expected CV_8UC3")]
    UnsupportedLayout(i32),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Dense row-major BGR8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = BGR_CHANNELS * width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; BGR_CHANNELS * width as usize * height as usize],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        BGR_CHANNELS
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies the pixels into an owned `CV_8UC3` mat.
    pub fn to_mat(&self) -> Result<Mat, FrameError> {
        if self.is_empty() {
            return Ok(Mat::default());
        }
        let flat = Mat::from_slice(&self.data)?;
        let shaped = flat.reshape(BGR_CHANNELS as i32, self.height as i32)?;
        Ok(shaped.try_clone()?)
    }

    pub fn from_mat(mat: &Mat) -> Result<Self, FrameError> {
        if mat.empty() {
            return Ok(Self::black(0, 0));
        }
        if mat.typ() != CV_8UC3 {
            return Err(FrameError::UnsupportedLayout(mat.typ()));
        }

        let continuous;
        let source = if mat.is_continuous() {
            mat
        } else {
            continuous = mat.try_clone()?;
            &continuous
        };

        let data = source.data_bytes()?.to_vec();
        Self::new(source.cols() as u32, source.rows() as u32, data)
    }
}
