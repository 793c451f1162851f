//! Frame acquisition.
//!
//! The monitor pulls exactly one frame per cycle through the
//! [`FrameSource`] trait. The shipped implementation reads the newest
//! upload from a spool directory written by an external camera.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::tracing::prelude::*;

/// A decoded camera frame.
pub type Frame = image::RgbImage;

/// Errors raised while acquiring a frame. A failed capture skips the
/// cycle; it never ends the monitor.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// No frame has arrived yet.
    #[error("no frames in {0}")]
    Empty(PathBuf),

    /// The newest frame is older than the configured maximum, which
    /// usually means the camera stopped uploading.
    #[error("newest frame {path} is {age_seconds}s old")]
    Stale { path: PathBuf, age_seconds: u64 },

    #[error("failed to read frame: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
}

/// Source of camera frames, one per monitoring cycle.
#[async_trait]
pub trait FrameSource: Send {
    /// Fetch the most recent frame.
    async fn capture(&mut self) -> Result<Frame, CaptureError>;
}

/// Reads the newest image from a spool directory.
pub struct SpoolDirSource {
    dir: PathBuf,
    max_age: Duration,
}

const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

impl SpoolDirSource {
    pub fn new(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }

    fn newest_frame(&self) -> Result<(PathBuf, SystemTime), CaptureError> {
        let mut newest: Option<(PathBuf, SystemTime)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_image(&path) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().is_none_or(|(_, seen)| modified > *seen) {
                newest = Some((path, modified));
            }
        }
        newest.ok_or_else(|| CaptureError::Empty(self.dir.clone()))
    }
}

#[async_trait]
impl FrameSource for SpoolDirSource {
    async fn capture(&mut self) -> Result<Frame, CaptureError> {
        let (path, modified) = self.newest_frame()?;

        // A frame stamped in the future counts as brand new.
        let age = modified.elapsed().unwrap_or_default();
        if age > self.max_age {
            return Err(CaptureError::Stale {
                path,
                age_seconds: age.as_secs(),
            });
        }

        debug!(path = %path.display(), "Reading frame");
        Ok(image::open(&path)?.into_rgb8())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            FRAME_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn temp_spool(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "argus-spool-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_frame(dir: &Path, name: &str, color: Rgb<u8>) -> PathBuf {
        let path = dir.join(name);
        let mut frame = RgbImage::new(4, 4);
        for pixel in frame.pixels_mut() {
            *pixel = color;
        }
        frame.save(&path).unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn should_capture_the_newest_frame() {
        let dir = temp_spool("newest");
        let old = write_frame(&dir, "a.png", Rgb([10, 10, 10]));
        let new = write_frame(&dir, "b.png", Rgb([200, 0, 0]));
        set_mtime(&old, SystemTime::now() - Duration::from_secs(60));
        set_mtime(&new, SystemTime::now());

        let mut source = SpoolDirSource::new(dir.clone(), Duration::from_secs(600));
        let frame = source.capture().await.unwrap();
        assert_eq!(*frame.get_pixel(0, 0), Rgb([200, 0, 0]));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn should_reject_a_stale_frame() {
        let dir = temp_spool("stale");
        let path = write_frame(&dir, "a.png", Rgb([10, 10, 10]));
        set_mtime(&path, SystemTime::now() - Duration::from_secs(3600));

        let mut source = SpoolDirSource::new(dir.clone(), Duration::from_secs(600));
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::Stale { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn should_report_an_empty_spool() {
        let dir = temp_spool("empty");

        let mut source = SpoolDirSource::new(dir.clone(), Duration::from_secs(600));
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::Empty(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn should_ignore_files_that_are_not_frames() {
        let dir = temp_spool("mixed");
        let frame = write_frame(&dir, "frame.png", Rgb([0, 99, 0]));
        set_mtime(&frame, SystemTime::now() - Duration::from_secs(30));
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let mut source = SpoolDirSource::new(dir.clone(), Duration::from_secs(600));
        let captured = source.capture().await.unwrap();
        assert_eq!(*captured.get_pixel(0, 0), Rgb([0, 99, 0]));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn should_surface_decode_failures() {
        let dir = temp_spool("garbage");
        std::fs::write(dir.join("broken.png"), b"definitely not a png").unwrap();

        let mut source = SpoolDirSource::new(dir.clone(), Duration::from_secs(600));
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::Decode(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
