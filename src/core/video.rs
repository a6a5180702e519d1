//! Frame access for video and hard-to-decode stills, delegated to ffmpeg.

use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::thumbnail::ThumbnailError;
use crate::config::BrightnessThresholds;

/// External decode/transcode capability.
pub trait MediaDecoder: Send + Sync {
    /// Container duration in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64, ThumbnailError>;

    /// Decode the frame nearest `seconds` into an image.
    fn frame_at(&self, path: &Path, seconds: f64) -> Result<DynamicImage, ThumbnailError>;

    /// Re-encode the first frame of a still as JPEG bytes.
    fn transcode_to_jpeg(&self, path: &Path) -> Result<Vec<u8>, ThumbnailError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn run(&self, program: &Path, args: &[&str], path: &Path, tail: &[&str]) -> Result<Vec<u8>, ThumbnailError> {
        let output = Command::new(program)
            .args(args)
            .arg(path)
            .args(tail)
            .output()
            .map_err(|e| ThumbnailError::Decoder {
                message: format!("failed to run {}: {}", program.display(), e),
            })?;

        if !output.status.success() {
            return Err(ThumbnailError::Decoder {
                message: format!(
                    "{} failed on {}: {}",
                    program.display(),
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(output.stdout)
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl MediaDecoder for FfmpegDecoder {
    fn probe_duration(&self, path: &Path) -> Result<f64, ThumbnailError> {
        let stdout = self.run(
            &self.ffprobe,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
            &[],
        )?;

        let text = String::from_utf8_lossy(&stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|_| ThumbnailError::Decoder {
                message: format!("unreadable duration {:?} for {}", text.trim(), path.display()),
            })
    }

    fn frame_at(&self, path: &Path, seconds: f64) -> Result<DynamicImage, ThumbnailError> {
        let offset = format!("{:.3}", seconds.max(0.0));
        let stdout = self.run(
            &self.ffmpeg,
            &["-nostdin", "-v", "error", "-ss", &offset, "-i"],
            path,
            &["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"],
        )?;

        if stdout.is_empty() {
            return Err(ThumbnailError::Decoder {
                message: format!("no frame at {}s in {}", offset, path.display()),
            });
        }
        Ok(image::load_from_memory(&stdout)?)
    }

    fn transcode_to_jpeg(&self, path: &Path) -> Result<Vec<u8>, ThumbnailError> {
        let stdout = self.run(
            &self.ffmpeg,
            &["-nostdin", "-v", "error", "-i"],
            path,
            &["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-"],
        )?;

        if stdout.is_empty() {
            return Err(ThumbnailError::Decoder {
                message: format!("empty transcode of {}", path.display()),
            });
        }
        Ok(stdout)
    }
}

/// Mean of the per-channel means over RGB, on a 0..=255 scale.
pub fn mean_brightness(img: &DynamicImage) -> f64 {
    let (width, height) = img.dimensions();
    let pixels = u64::from(width) * u64::from(height);
    if pixels == 0 {
        return 0.0;
    }

    let rgb = img.to_rgb8();
    let mut sums = [0u64; 3];
    for pixel in rgb.pixels() {
        for (channel, sum) in sums.iter_mut().enumerate() {
            *sum += u64::from(pixel[channel]);
        }
    }

    let channel_means: f64 = sums.iter().map(|sum| *sum as f64 / pixels as f64).sum();
    channel_means / 3.0
}

/// Timestamps tried, in order, when looking for a representative frame.
pub fn candidate_timestamps(duration: f64) -> [f64; 3] {
    [0.0, duration / 3.0, 2.0 * duration / 3.0]
}

/// Pick a representative frame from a video.
///
/// Returns `Ok(None)` when the container reports no positive duration.
/// Near-black and near-white frames are skipped; if every candidate is
/// rejected the last one sampled is used anyway.
pub fn sample_frame(
    decoder: &dyn MediaDecoder,
    path: &Path,
    thresholds: &BrightnessThresholds,
) -> Result<Option<DynamicImage>, ThumbnailError> {
    let duration = decoder.probe_duration(path)?;
    if !(duration > 0.0) {
        log::debug!("{} reports duration {}; skipping frames", path.display(), duration);
        return Ok(None);
    }

    let mut last = None;
    for timestamp in candidate_timestamps(duration) {
        let frame = decoder.frame_at(path, timestamp)?;
        let brightness = mean_brightness(&frame);

        if thresholds.accepts(brightness) {
            return Ok(Some(frame));
        }

        log::debug!(
            "Rejecting frame at {:.2}s of {} (brightness {:.1})",
            timestamp,
            path.display(),
            brightness
        );
        last = Some(frame);
    }

    Ok(last)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Decoder serving solid frames of preset brightness per timestamp slot.
    pub struct FakeDecoder {
        pub duration: f64,
        pub levels: Vec<u8>,
        pub requested: Mutex<Vec<f64>>,
    }

    impl FakeDecoder {
        pub fn new(duration: f64, levels: &[u8]) -> Self {
            Self {
                duration,
                levels: levels.to_vec(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl MediaDecoder for FakeDecoder {
        fn probe_duration(&self, _path: &Path) -> Result<f64, ThumbnailError> {
            Ok(self.duration)
        }

        fn frame_at(&self, _path: &Path, seconds: f64) -> Result<DynamicImage, ThumbnailError> {
            let mut requested = self.requested.lock().unwrap();
            let level = self.levels[requested.len().min(self.levels.len() - 1)];
            requested.push(seconds);
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                64,
                48,
                Rgb([level, level, level]),
            )))
        }

        fn transcode_to_jpeg(&self, _path: &Path) -> Result<Vec<u8>, ThumbnailError> {
            Err(ThumbnailError::Decoder {
                message: "fake decoder cannot transcode".to_string(),
            })
        }
    }

    fn level_of(frame: &DynamicImage) -> u8 {
        frame.to_rgb8().get_pixel(0, 0)[0]
    }

    #[test]
    fn test_mean_brightness() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([30, 60, 90])));
        assert!((mean_brightness(&img) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_acceptable_frame_wins() {
        let decoder = FakeDecoder::new(90.0, &[128, 100, 100]);
        let frame = sample_frame(&decoder, Path::new("v.mp4"), &BrightnessThresholds::default())
            .unwrap()
            .unwrap();

        assert_eq!(level_of(&frame), 128);
        assert_eq!(*decoder.requested.lock().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_dark_and_bright_frames_are_skipped() {
        let decoder = FakeDecoder::new(90.0, &[5, 250, 140]);
        let frame = sample_frame(&decoder, Path::new("v.mp4"), &BrightnessThresholds::default())
            .unwrap()
            .unwrap();

        assert_eq!(level_of(&frame), 140);
        assert_eq!(*decoder.requested.lock().unwrap(), vec![0.0, 30.0, 60.0]);
    }

    #[test]
    fn test_all_rejected_falls_back_to_last() {
        let decoder = FakeDecoder::new(30.0, &[0, 255, 10]);
        let frame = sample_frame(&decoder, Path::new("v.mp4"), &BrightnessThresholds::default())
            .unwrap()
            .unwrap();

        assert_eq!(level_of(&frame), 10);
    }

    #[test]
    fn test_zero_duration_yields_nothing() {
        let decoder = FakeDecoder::new(0.0, &[128]);
        let frame =
            sample_frame(&decoder, Path::new("v.mp4"), &BrightnessThresholds::default()).unwrap();

        assert!(frame.is_none());
        assert!(decoder.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let decoder = FakeDecoder::new(30.0, &[50, 128, 128]);
        let strict = BrightnessThresholds {
            low: 60.0,
            high: 200.0,
        };
        let frame = sample_frame(&decoder, Path::new("v.mp4"), &strict)
            .unwrap()
            .unwrap();

        assert_eq!(level_of(&frame), 128);
        assert_eq!(decoder.requested.lock().unwrap().len(), 2);
    }
}
