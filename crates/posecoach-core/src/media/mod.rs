//! Media capabilities — camera, reference clips, and landmark extraction.
//!
//! Decoding and pose inference live outside this crate; these traits are the
//! seams where a concrete backend plugs in. All handles are opened on the
//! producer thread, so only the backend itself must be `Send + Sync`.

pub mod playlist;
pub mod scripted;

use std::path::Path;

use anyhow::{Context, Result};

use crate::pose::Pose;

/// One decoded video frame. The producer never inspects the pixels; they are
/// handed to the landmark source as-is.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Live camera.
pub trait FrameSource {
    /// Read the next frame. An error means the camera is unusable.
    fn read_frame(&mut self) -> Result<Frame>;
    fn name(&self) -> &str;
}

/// Pose estimator.
pub trait LandmarkSource {
    /// `Ok(None)` when no person is in the frame.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Pose>>;
    fn name(&self) -> &str;
}

/// Sequential reader over a demonstration clip.
pub trait ReferenceClip {
    /// `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
    fn name(&self) -> &str;
}

/// Opens the media handles a producer needs.
pub trait MediaBackend: Send + Sync {
    fn open_camera(&self, index: u32) -> Result<Box<dyn FrameSource>>;
    fn open_clip(&self, path: &Path) -> Result<Box<dyn ReferenceClip>>;
    fn landmark_source(&self) -> Result<Box<dyn LandmarkSource>>;
    fn name(&self) -> &str;
}

/// Open camera `index`, then try the next `fallbacks` indices in order.
pub fn open_camera_with_fallback(
    backend: &dyn MediaBackend,
    index: u32,
    fallbacks: u32,
) -> Result<Box<dyn FrameSource>> {
    let mut last_err = None;
    for i in index..=index.saturating_add(fallbacks) {
        match backend.open_camera(i) {
            Ok(cam) => {
                if i != index {
                    log::warn!("Camera {index} unavailable, using camera {i} ({})", cam.name());
                } else {
                    log::info!("Camera {i} opened ({})", cam.name());
                }
                return Ok(cam);
            }
            Err(e) => {
                log::warn!("Camera {i}: {e:#}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no camera index to try")))
        .with_context(|| format!("no usable camera among indices {index}..={}", index.saturating_add(fallbacks)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scripted::ScriptedBackend;

    #[test]
    fn fallback_finds_later_camera() {
        let backend = ScriptedBackend::new().with_camera_indices(&[2]);
        let cam = open_camera_with_fallback(&backend, 0, 3).unwrap();
        assert_eq!(cam.name(), "scripted-camera-2");
    }

    #[test]
    fn fallback_exhausted_is_an_error() {
        let backend = ScriptedBackend::new().with_camera_indices(&[9]);
        let err = open_camera_with_fallback(&backend, 0, 3).err().unwrap();
        assert!(format!("{err:#}").contains("0..=3"), "{err:#}");
    }
}
