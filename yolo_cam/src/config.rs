//! Detector and frame loop settings.
//!
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Settings of the per-frame post-processing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectorConfig {
    /// Side length of the square model input.
    pub input_size: u32,
    /// Minimum objectness for a row to become a candidate.
    pub confidence_threshold: f32,
    /// Boxes overlapping a kept box by more than this are suppressed.
    pub iou_threshold: f32,
    /// Candidates with a class score not above this are dropped before suppression.
    pub score_threshold: f32,
    pub max_detections: usize,
    /// Run suppression per class instead of over all candidates at once.
    pub class_aware: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            score_threshold: 0.25,
            max_detections: 100,
            class_aware: false,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            bail!("input size must be positive");
        }
        for (name, value) in [
            ("confidence threshold", self.confidence_threshold),
            ("IoU threshold", self.iou_threshold),
            ("score threshold", self.score_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }

        Ok(())
    }
}

/// Settings of the frame loop driver.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopConfig {
    /// Stop after this many frames failed in a row.
    pub max_consecutive_failures: u32,
    /// Minimum time between two frames. `None` runs as fast as the pipeline allows.
    pub frame_interval: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            frame_interval: None,
        }
    }
}

impl LoopConfig {
    /// Pace the loop to at most `fps` frames per second. Zero or less disables pacing.
    pub fn with_max_fps(mut self, fps: f32) -> Result<Self> {
        self.frame_interval = if fps > 0.0 {
            match Duration::try_from_secs_f32(1.0 / fps) {
                Ok(period) => Some(period),
                Err(err) => bail!("unusable frame rate {fps}: {err}"),
            }
        } else {
            None
        };
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_interval == Some(Duration::ZERO) {
            bail!("frame interval must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        let config = DetectorConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DetectorConfig {
            iou_threshold: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DetectorConfig {
            score_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DetectorConfig {
            input_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_fps_sets_frame_interval() -> Result<()> {
        let config = LoopConfig::default().with_max_fps(4.0)?;
        assert_eq!(config.frame_interval, Some(Duration::from_millis(250)));

        let config = LoopConfig::default().with_max_fps(0.0)?;
        assert_eq!(config.frame_interval, None);

        let config = LoopConfig::default().with_max_fps(f32::NAN)?;
        assert_eq!(config.frame_interval, None);

        Ok(())
    }

    #[test]
    fn extreme_frame_rates_are_rejected() {
        // Rounds to a zero interval
        assert!(LoopConfig::default().with_max_fps(1e10).is_err());
        assert!(LoopConfig::default().with_max_fps(f32::INFINITY).is_err());
        // Interval too long for a Duration
        assert!(LoopConfig::default().with_max_fps(f32::MIN_POSITIVE).is_err());
    }

    #[test]
    fn zero_frame_interval_is_rejected() {
        let config = LoopConfig {
            frame_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(LoopConfig::default().validate().is_ok());
    }
}
