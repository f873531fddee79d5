//! Gaze segmentation and scanpath metrics
//!
//! Raw tracker samples are split into fixations and saccades with a velocity
//! threshold:
//! - Low-confidence and non-finite samples are dropped
//! - Consecutive samples moving slower than the threshold form a fixation
//!   (centroid position, first-to-last duration)
//! - Fixations shorter than the minimum duration are discarded
//! - Each hop between kept fixations becomes a saccade landing on the next
//!   fixation, carrying the peak velocity seen in between

use crate::types::{EyeTrackingMetrics, FixationEvent, GazeEvent, SaccadeEvent, Scanpath};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Velocity-threshold segmentation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Samples below this tracker confidence are ignored
    pub min_confidence: f64,
    /// Screen pixels per degree of visual angle
    pub pixels_per_degree: f64,
    /// Degrees per second separating fixation from saccade samples
    pub velocity_threshold_dps: f64,
    pub min_fixation_ms: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            pixels_per_degree: 35.0,
            velocity_threshold_dps: 100.0,
            min_fixation_ms: 60.0,
        }
    }
}

#[derive(Debug)]
struct Group {
    sum_x: f64,
    sum_y: f64,
    count: usize,
    start: i64,
    end: i64,
}

impl Group {
    fn begin(point: &GazeEvent) -> Self {
        Self {
            sum_x: point.x,
            sum_y: point.y,
            count: 1,
            start: point.timestamp,
            end: point.timestamp,
        }
    }

    fn push(&mut self, point: &GazeEvent) {
        self.sum_x += point.x;
        self.sum_y += point.y;
        self.count += 1;
        self.end = point.timestamp;
    }

    fn duration_ms(&self) -> f64 {
        (self.end - self.start) as f64
    }

    fn fixation(&self) -> FixationEvent {
        let n = self.count.max(1) as f64;
        FixationEvent {
            x: self.sum_x / n,
            y: self.sum_y / n,
            duration_ms: self.duration_ms(),
        }
    }
}

/// Splits raw gaze samples into a [`Scanpath`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GazeSegmenter {
    config: GazeConfig,
}

impl GazeSegmenter {
    pub fn new(config: GazeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GazeConfig {
        &self.config
    }

    /// Angular velocity between two samples in degrees per second
    pub fn velocity(&self, from: &GazeEvent, to: &GazeEvent) -> f64 {
        let dt_ms = (to.timestamp - from.timestamp) as f64;
        if dt_ms <= 0.0 || self.config.pixels_per_degree <= 0.0 {
            return 0.0;
        }
        let distance = (to.x - from.x).hypot(to.y - from.y);
        distance / self.config.pixels_per_degree / (dt_ms / 1000.0)
    }

    pub fn segment(&self, points: &[GazeEvent]) -> Scanpath {
        let mut samples: Vec<GazeEvent> = points
            .iter()
            .filter(|p| p.x.is_finite() && p.y.is_finite())
            .filter(|p| p.confidence >= self.config.min_confidence)
            .copied()
            .collect();
        samples.sort_by_key(|p| p.timestamp);

        let mut scanpath = Scanpath::default();
        let Some(first) = samples.first() else {
            return scanpath;
        };

        let mut group = Group::begin(first);
        let mut peak = 0.0f64;
        let mut has_fixation = false;

        for pair in samples.windows(2) {
            let velocity = self.velocity(&pair[0], &pair[1]);
            if velocity < self.config.velocity_threshold_dps {
                group.push(&pair[1]);
                continue;
            }
            self.close(&group, &mut scanpath, &mut peak, &mut has_fixation);
            peak = peak.max(velocity);
            group = Group::begin(&pair[1]);
        }
        self.close(&group, &mut scanpath, &mut peak, &mut has_fixation);

        debug!(
            samples = samples.len(),
            fixations = scanpath.fixations.len(),
            saccades = scanpath.saccades.len(),
            "gaze segmented"
        );
        scanpath
    }

    fn close(
        &self,
        group: &Group,
        scanpath: &mut Scanpath,
        peak: &mut f64,
        has_fixation: &mut bool,
    ) {
        if group.duration_ms() < self.config.min_fixation_ms {
            return;
        }
        let fixation = group.fixation();
        if *has_fixation {
            scanpath.saccades.push(SaccadeEvent {
                to_x: fixation.x,
                to_y: fixation.y,
                velocity: *peak,
            });
        }
        scanpath.fixations.push(fixation);
        *has_fixation = true;
        *peak = 0.0;
    }
}

impl EyeTrackingMetrics {
    /// Summary metrics for a scanpath on a screen of the given pixel size
    pub fn from_scanpath(scanpath: &Scanpath, screen_width: f64, screen_height: f64) -> Self {
        let durations: Vec<f64> = scanpath
            .fixations
            .iter()
            .map(|f| finite_non_negative(f.duration_ms))
            .collect();
        let velocities: Vec<f64> = scanpath
            .saccades
            .iter()
            .map(|s| finite_non_negative(s.velocity))
            .collect();

        Self {
            avg_fixation_duration: mean(&durations),
            fixation_count: scanpath.fixations.len(),
            saccade_count: scanpath.saccades.len(),
            avg_saccade_velocity: mean(&velocities),
            gaze_dispersion: dispersion(
                &scanpath.fixations,
                &durations,
                screen_width,
                screen_height,
            ),
        }
    }
}

fn finite_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Duration-weighted RMS distance from the weighted centroid over the screen
/// diagonal. Falls back to equal weights when every duration is zero.
fn dispersion(fixations: &[FixationEvent], weights: &[f64], width: f64, height: f64) -> f64 {
    let diagonal = width.hypot(height);
    if !diagonal.is_finite() || diagonal <= 0.0 {
        return 0.0;
    }

    let points: Vec<(f64, f64, f64)> = fixations
        .iter()
        .zip(weights)
        .filter(|(f, _)| f.x.is_finite() && f.y.is_finite())
        .map(|(f, w)| (f.x, f.y, *w))
        .collect();
    if points.len() < 2 {
        return 0.0;
    }

    let total: f64 = points.iter().map(|p| p.2).sum();
    let weight = |w: f64| if total > 0.0 { w } else { 1.0 };
    let norm: f64 = points.iter().map(|p| weight(p.2)).sum();

    let cx = points.iter().map(|p| p.0 * weight(p.2)).sum::<f64>() / norm;
    let cy = points.iter().map(|p| p.1 * weight(p.2)).sum::<f64>() / norm;
    let spread = points
        .iter()
        .map(|p| weight(p.2) * ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)))
        .sum::<f64>()
        / norm;

    (spread.sqrt() / diagonal).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(x: f64, y: f64, timestamp: i64) -> GazeEvent {
        GazeEvent {
            x,
            y,
            timestamp,
            confidence: 0.9,
        }
    }

    /// `count` samples 10ms apart with 1px jitter
    fn dwell(x: f64, y: f64, start: i64, count: i64) -> Vec<GazeEvent> {
        (0..count)
            .map(|i| sample(x + (i % 2) as f64, y, start + i * 10))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let scanpath = GazeSegmenter::default().segment(&[]);
        assert!(scanpath.fixations.is_empty());
        assert!(scanpath.saccades.is_empty());
    }

    #[test]
    fn test_two_dwells_one_saccade() {
        let mut points = dwell(100.0, 100.0, 0, 20);
        points.extend(dwell(900.0, 500.0, 210, 20));
        let scanpath = GazeSegmenter::default().segment(&points);

        assert_eq!(scanpath.fixations.len(), 2);
        assert_eq!(scanpath.saccades.len(), 1);
        assert!((scanpath.fixations[0].x - 100.5).abs() < 1e-9);
        assert!((scanpath.fixations[0].duration_ms - 190.0).abs() < 1e-9);
        assert!((scanpath.saccades[0].to_x - 900.5).abs() < 1e-9);
        assert!((scanpath.saccades[0].to_y - 500.0).abs() < 1e-9);

        // Last sample of the first dwell sits at x=101
        let expected = 799.0f64.hypot(400.0) / 35.0 / 0.02;
        assert!((scanpath.saccades[0].velocity - expected).abs() < 1.0);
    }

    #[test]
    fn test_short_dwell_discarded() {
        let mut points = dwell(100.0, 100.0, 0, 20);
        points.extend(dwell(500.0, 500.0, 200, 3)); // 20ms
        points.extend(dwell(900.0, 100.0, 240, 20));
        let scanpath = GazeSegmenter::default().segment(&points);

        assert_eq!(scanpath.fixations.len(), 2);
        assert_eq!(scanpath.saccades.len(), 1);
        assert!((scanpath.saccades[0].to_x - 900.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_confidence_and_unsorted_samples() {
        let mut points = dwell(300.0, 300.0, 0, 10);
        points.reverse();
        points.push(GazeEvent {
            x: 1500.0,
            y: 900.0,
            timestamp: 45,
            confidence: 0.1,
        });
        let scanpath = GazeSegmenter::default().segment(&points);

        assert_eq!(scanpath.fixations.len(), 1);
        assert!(scanpath.saccades.is_empty());
        assert!((scanpath.fixations[0].duration_ms - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_from_scanpath() {
        let scanpath = Scanpath {
            fixations: vec![
                FixationEvent { x: 0.0, y: 0.0, duration_ms: 200.0 },
                FixationEvent { x: 300.0, y: 400.0, duration_ms: 200.0 },
            ],
            saccades: vec![SaccadeEvent { to_x: 300.0, to_y: 400.0, velocity: 250.0 }],
        };
        let metrics = EyeTrackingMetrics::from_scanpath(&scanpath, 600.0, 800.0);

        assert_eq!(metrics.fixation_count, 2);
        assert_eq!(metrics.saccade_count, 1);
        assert!((metrics.avg_fixation_duration - 200.0).abs() < 1e-9);
        assert!((metrics.avg_saccade_velocity - 250.0).abs() < 1e-9);
        // Each point is 250px from the centroid, diagonal is 1000px
        assert!((metrics.gaze_dispersion - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_degenerate_inputs() {
        let empty = EyeTrackingMetrics::from_scanpath(&Scanpath::default(), 1920.0, 1080.0);
        assert_eq!(empty.avg_fixation_duration, 0.0);
        assert_eq!(empty.gaze_dispersion, 0.0);

        let scanpath = Scanpath {
            fixations: vec![
                FixationEvent { x: 0.0, y: 0.0, duration_ms: 0.0 },
                FixationEvent { x: 100.0, y: 0.0, duration_ms: f64::NAN },
            ],
            saccades: Vec::new(),
        };
        let zero_screen = EyeTrackingMetrics::from_scanpath(&scanpath, 0.0, 0.0);
        assert_eq!(zero_screen.gaze_dispersion, 0.0);

        let unweighted = EyeTrackingMetrics::from_scanpath(&scanpath, 600.0, 800.0);
        assert!((unweighted.gaze_dispersion - 0.05).abs() < 1e-9);
    }
}
