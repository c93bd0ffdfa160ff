use std::path::Path;

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use cv2::prelude::*;
use log::{debug, warn};
use opencv as cv2;

use cv2::core::Mat;
use cv2::videoio;

/// Sequential frame reader over a video file
pub struct VideoInput {
    capture: videoio::VideoCapture,
    frame_count: Option<u64>,
}

impl VideoInput {
    pub fn new(path: &Path) -> Result<VideoInput> {
        let path_str = path
            .to_str()
            .ok_or(anyhow!("Video path is not valid UTF-8: {}", path.display()))?;
        let capture = videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .with_context(|| format!("Failed to open video {}", path.display()))?;
        if !capture.is_opened()? {
            bail!("Cannot read video {}", path.display());
        }

        let count = capture.get(videoio::CAP_PROP_FRAME_COUNT)?;
        let frame_count = if count > 0. { Some(count as u64) } else { None };
        debug!("opened {} with {:?} frames", path.display(), frame_count);

        Ok(VideoInput {
            capture,
            frame_count,
        })
    }

    /// Number of frames reported by the container, if any
    pub fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    /// Next BGR frame, `None` at the end of the stream
    pub fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? {
            return Ok(None);
        }
        let size = frame.size()?;
        if size.width == 0 || size.height == 0 {
            warn!("Empty frame, treating as end of stream");
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
