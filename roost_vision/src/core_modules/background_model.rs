// THEORY:
// The `BackgroundModel` learns what the empty scene looks like. Frame differencing
// only sees change between two consecutive frames, so a bird that moves slowly, or
// that stops for a moment, disappears from the difference image. The background
// model catches those cases by comparing each pixel against its own long-term
// statistics instead of against the previous frame.
//
// Every pixel of every plane carries a running mean and variance, updated as an
// exponential moving average:
//
//     mean <- mean + a * (x - mean)
//     var  <- (1 - a) * var + a * (x - mean)^2
//
// A pixel is foreground when its squared deviation exceeds `var_threshold * var`
// on any plane. Classification happens before the update so that a new object is
// reported on the frame it first appears in.

use image::{GrayImage, Luma};

const INITIAL_VARIANCE: f32 = 15.0 * 15.0;
const MIN_VARIANCE: f32 = 4.0;

/// Running per-pixel gaussian estimate of the static scene.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    /// One mean buffer per plane.
    means: Vec<Vec<f32>>,
    /// One variance buffer per plane.
    variances: Vec<Vec<f32>>,
    learning_rate: f32,
    var_threshold: f32,
}

impl BackgroundModel {
    /// Seeds the model from the first frame of a session.
    pub fn seed(planes: &[GrayImage], learning_rate: f64, var_threshold: f64) -> Self {
        let (width, height) = planes.first().map_or((0, 0), |p| p.dimensions());
        let means: Vec<Vec<f32>> = planes
            .iter()
            .map(|p| p.as_raw().iter().map(|&v| v as f32).collect())
            .collect();
        let variances = means.iter().map(|m| vec![INITIAL_VARIANCE; m.len()]).collect();
        Self {
            width,
            height,
            means,
            variances,
            learning_rate: learning_rate as f32,
            var_threshold: var_threshold as f32,
        }
    }

    /// Classifies every pixel against the model, then folds the frame into it.
    /// Foreground pixels are set to `foreground`.
    pub fn apply(&mut self, planes: &[GrayImage], foreground: u8) -> GrayImage {
        let len = (self.width * self.height) as usize;
        let mut mask = vec![0u8; len];
        let a = self.learning_rate;

        for ((plane, means), variances) in planes
            .iter()
            .zip(self.means.iter_mut())
            .zip(self.variances.iter_mut())
        {
            for (i, &raw) in plane.as_raw().iter().enumerate().take(len) {
                let x = raw as f32;
                let delta = x - means[i];
                if delta * delta > self.var_threshold * variances[i] {
                    mask[i] = foreground;
                }
                means[i] += a * delta;
                let deviation = x - means[i];
                let variance = (1.0 - a) * variances[i] + a * deviation * deviation;
                variances[i] = variance.max(MIN_VARIANCE);
            }
        }

        GrayImage::from_raw(self.width, self.height, mask)
            .unwrap_or_else(|| GrayImage::from_pixel(self.width, self.height, Luma([0])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_scene_is_background() {
        let plane = GrayImage::from_pixel(8, 8, Luma([90]));
        let mut model = BackgroundModel::seed(&[plane.clone()], 0.01, 16.0);
        for _ in 0..5 {
            let mask = model.apply(&[plane.clone()], 255);
            assert!(mask.pixels().all(|p| p[0] == 0));
        }
    }

    #[test]
    fn large_deviation_is_foreground() {
        let plane = GrayImage::from_pixel(8, 8, Luma([90]));
        let mut model = BackgroundModel::seed(&[plane.clone()], 0.01, 16.0);
        let mut moved = plane.clone();
        moved.put_pixel(3, 3, Luma([250]));
        let mask = model.apply(&[moved], 255);
        assert_eq!(mask.get_pixel(3, 3)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn object_that_stays_is_absorbed_over_time() {
        let empty = GrayImage::from_pixel(4, 4, Luma([50]));
        let full = GrayImage::from_pixel(4, 4, Luma([200]));
        let mut model = BackgroundModel::seed(&[empty], 0.5, 16.0);
        let first = model.apply(&[full.clone()], 255);
        assert_eq!(first.get_pixel(0, 0)[0], 255);
        let mut last = first;
        for _ in 0..30 {
            last = model.apply(&[full.clone()], 255);
        }
        assert_eq!(last.get_pixel(0, 0)[0], 0);
    }
}
