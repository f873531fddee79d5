//! Scanpath rasterization
//!
//! This module turns a list of fixations and saccades into a fixed-size spatial
//! tensor for the visual encoder:
//! - Channel 0: fixation density (count per cell)
//! - Channel 1: cumulative fixation duration (seconds per cell)
//! - Channel 2: saccade velocity landing in the cell (velocity / 100)
//!
//! Each channel is max-normalized independently to 0-1. Rasterization is a
//! total function: empty input, zero screen sizes, and out-of-screen
//! coordinates all produce a valid tensor.

use crate::types::{FixationEvent, SaccadeEvent, Scanpath, ScanpathTensor, DEFAULT_GRID_SIZE};

const DENSITY: usize = 0;
const DURATION: usize = 1;
const VELOCITY: usize = 2;

/// Rasterizer for converting scanpath events to a `grid x grid x 3` tensor
#[derive(Debug, Clone, Copy)]
pub struct ScanpathRasterizer {
    grid_size: usize,
}

impl Default for ScanpathRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}

impl ScanpathRasterizer {
    pub fn new(grid_size: usize) -> Self {
        Self { grid_size }
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Rasterize a scanpath onto a screen of the given pixel size
    pub fn rasterize_scanpath(
        &self,
        scanpath: &Scanpath,
        screen_width: f64,
        screen_height: f64,
    ) -> ScanpathTensor {
        self.rasterize(
            &scanpath.fixations,
            &scanpath.saccades,
            screen_width,
            screen_height,
        )
    }

    /// Rasterize fixations and saccades onto a screen of the given pixel size
    pub fn rasterize(
        &self,
        fixations: &[FixationEvent],
        saccades: &[SaccadeEvent],
        screen_width: f64,
        screen_height: f64,
    ) -> ScanpathTensor {
        let grid = self.grid_size;
        if grid == 0 {
            return ScanpathTensor::zeros(0);
        }

        let cell_width = screen_width / grid as f64;
        let cell_height = screen_height / grid as f64;

        // Accumulate in f64 so large sessions don't lose precision before normalizing
        let mut acc = vec![0.0f64; grid * grid * 3];
        let mut accumulate = |row: usize, col: usize, channel: usize, value: f64| {
            let idx = (row * grid + col) * 3 + channel;
            acc[idx] = (acc[idx] + value).min(f64::MAX);
        };

        for fix in fixations {
            let col = cell_index(fix.x, cell_width, grid);
            let row = cell_index(fix.y, cell_height, grid);
            accumulate(row, col, DENSITY, 1.0);
            accumulate(row, col, DURATION, non_negative(fix.duration_ms) / 1000.0);
        }

        for sacc in saccades {
            let col = cell_index(sacc.to_x, cell_width, grid);
            let row = cell_index(sacc.to_y, cell_height, grid);
            accumulate(row, col, VELOCITY, non_negative(sacc.velocity) / 100.0);
        }

        let mut tensor = ScanpathTensor::zeros(grid);
        for channel in 0..3 {
            let max = acc
                .iter()
                .skip(channel)
                .step_by(3)
                .fold(0.0f64, |m, v| m.max(*v));
            let out = tensor.data_mut();
            for (idx, value) in acc.iter().enumerate().skip(channel).step_by(3) {
                out[idx] = if max > 0.0 { (value / max) as f32 } else { 0.0 };
            }
        }

        tensor
    }
}

/// Map a pixel coordinate to a cell index, clamping into `[0, grid - 1]`
fn cell_index(coord: f64, cell_size: f64, grid: usize) -> usize {
    let idx = (coord / cell_size).floor();
    if idx.is_nan() || idx <= 0.0 {
        return 0;
    }
    // Float-to-int casts saturate, so +inf lands on the last cell
    (idx as usize).min(grid - 1)
}

/// Contribution weights must be finite and non-negative to keep channels in 0-1
fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Convenience wrapper using the default 50x50 grid
pub fn rasterize(
    fixations: &[FixationEvent],
    saccades: &[SaccadeEvent],
    screen_width: f64,
    screen_height: f64,
) -> ScanpathTensor {
    ScanpathRasterizer::default().rasterize(fixations, saccades, screen_width, screen_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(x: f64, y: f64, duration_ms: f64) -> FixationEvent {
        FixationEvent { x, y, duration_ms }
    }

    fn sacc(to_x: f64, to_y: f64, velocity: f64) -> SaccadeEvent {
        SaccadeEvent { to_x, to_y, velocity }
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let tensor = rasterize(&[], &[], 1920.0, 1080.0);
        assert_eq!(tensor.shape(), [50, 50, 3]);
        assert!(tensor.is_all_zero());
    }

    #[test]
    fn test_corner_fixation_lands_in_last_cell() {
        let tensor = rasterize(&[fix(1920.0, 1080.0, 500.0)], &[], 1920.0, 1080.0);

        assert_eq!(tensor.get(49, 49, DENSITY), 1.0);
        assert_eq!(tensor.get(49, 49, DURATION), 1.0);
        assert_eq!(tensor.get(49, 49, VELOCITY), 0.0);
        assert_eq!(tensor.channel(DENSITY).filter(|v| *v != 0.0).count(), 1);
    }

    #[test]
    fn test_cell_mapping_uses_integer_division() {
        // 1920 / 50 = 38.4 px per column, 1080 / 50 = 21.6 px per row
        let tensor = rasterize(&[fix(100.0, 50.0, 200.0)], &[], 1920.0, 1080.0);
        assert_eq!(tensor.get(2, 2, DENSITY), 1.0);
    }

    #[test]
    fn test_channels_normalized_independently() {
        let fixations = [
            fix(10.0, 10.0, 1000.0),
            fix(10.0, 10.0, 1000.0),
            fix(1000.0, 500.0, 4000.0),
        ];
        let saccades = [sacc(1000.0, 500.0, 250.0), sacc(10.0, 10.0, 500.0)];
        let tensor = rasterize(&fixations, &saccades, 1920.0, 1080.0);

        let (r0, c0) = (0, 0);
        let (r1, c1) = (23, 26);

        // Density: 2 vs 1
        assert!((tensor.get(r0, c0, DENSITY) - 1.0).abs() < 1e-6);
        assert!((tensor.get(r1, c1, DENSITY) - 0.5).abs() < 1e-6);
        // Duration: 2s vs 4s
        assert!((tensor.get(r0, c0, DURATION) - 0.5).abs() < 1e-6);
        assert!((tensor.get(r1, c1, DURATION) - 1.0).abs() < 1e-6);
        // Velocity: 2.5 vs 5.0
        assert!((tensor.get(r1, c1, VELOCITY) - 0.5).abs() < 1e-6);
        assert!((tensor.get(r0, c0, VELOCITY) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_bounds_coordinates_clamp() {
        let fixations = [
            fix(5000.0, 5000.0, 100.0),
            fix(-20.0, -3000.0, 100.0),
            fix(f64::INFINITY, f64::NAN, 100.0),
        ];
        let tensor = rasterize(&fixations, &[], 1920.0, 1080.0);

        assert!(tensor.get(49, 49, DENSITY) > 0.0);
        assert!(tensor.get(0, 0, DENSITY) > 0.0);
        assert!(tensor.get(0, 49, DENSITY) > 0.0);
    }

    #[test]
    fn test_degenerate_screen_and_weights_stay_in_range() {
        let fixations = [fix(10.0, 10.0, f64::NAN), fix(10.0, 10.0, -500.0)];
        let saccades = [sacc(10.0, 10.0, f64::INFINITY)];
        let tensor = rasterize(&fixations, &saccades, 0.0, 0.0);

        assert!(tensor.data().iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
        // Only density is populated; duration and velocity contributions were discarded
        assert_eq!(tensor.channel(DURATION).sum::<f32>(), 0.0);
        assert_eq!(tensor.channel(VELOCITY).sum::<f32>(), 0.0);
    }

    #[test]
    fn test_custom_grid_size() {
        let rasterizer = ScanpathRasterizer::new(10);
        let tensor = rasterizer.rasterize(&[fix(960.0, 540.0, 300.0)], &[], 1920.0, 1080.0);
        assert_eq!(tensor.shape(), [10, 10, 3]);
        assert_eq!(tensor.get(5, 5, DENSITY), 1.0);
    }
}
