//! Per-element training loss terms.
//!
//! [`LossAggregator::compute`] returns every active term unreduced. Summing
//! or averaging them into one scalar is left to the training loop.

use crate::error::{TrainError, TrainResult};
use glam::Vec3;
use std::collections::BTreeMap;
use std::fmt;

/// Machine epsilon of IEEE half precision, `2^-10`.
pub const OPACITY_EPSILON: f32 = 9.765625e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LossTerm {
    Rgb,
    Opacity,
    Distortion,
}

impl LossTerm {
    pub fn name(&self) -> &'static str {
        match self {
            LossTerm::Rgb => "rgb",
            LossTerm::Opacity => "opacity",
            LossTerm::Distortion => "distortion",
        }
    }
}

impl fmt::Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type LossTerms = BTreeMap<LossTerm, Vec<f32>>;

/// Contiguous run of samples belonging to one ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaySegment {
    pub start: usize,
    pub count: usize,
}

/// Per-sample quantities consumed by a distortion regularizer.
#[derive(Debug, Clone, Copy)]
pub struct DistortionInputs<'a> {
    pub weights: &'a [f32],
    /// Interval widths.
    pub deltas: &'a [f32],
    /// Interval midpoints along the ray.
    pub ts: &'a [f32],
    pub segments: &'a [RaySegment],
}

impl DistortionInputs<'_> {
    pub fn validate(&self) -> TrainResult<()> {
        let n = self.weights.len();
        if self.deltas.len() != n || self.ts.len() != n {
            return Err(TrainError::ShapeMismatch(format!(
                "distortion inputs disagree: {} weights, {} deltas, {} ts",
                n,
                self.deltas.len(),
                self.ts.len()
            )));
        }
        if let Some(seg) = self
            .segments
            .iter()
            .find(|s| s.start.checked_add(s.count).is_none_or(|end| end > n))
        {
            return Err(TrainError::ShapeMismatch(format!(
                "ray segment starting at {} with {} samples exceeds {n} samples",
                seg.start, seg.count
            )));
        }
        Ok(())
    }
}

/// Computes the per-ray distortion regularizer.
pub trait DistortionKernel {
    /// One value per entry of `inputs.segments`.
    fn evaluate(&self, inputs: &DistortionInputs<'_>) -> TrainResult<Vec<f32>>;
}

/// Combines photometric and regularization terms.
pub struct LossAggregator {
    pub lambda_opacity: f32,
    pub lambda_distortion: f32,
    kernel: Option<Box<dyn DistortionKernel>>,
}

impl Default for LossAggregator {
    fn default() -> Self {
        Self::new(0.0, 0.01)
    }
}

impl LossAggregator {
    pub fn new(lambda_opacity: f32, lambda_distortion: f32) -> Self {
        Self {
            lambda_opacity,
            lambda_distortion,
            kernel: None,
        }
    }

    pub fn with_distortion_kernel(mut self, kernel: Box<dyn DistortionKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Per-element loss terms.
    ///
    /// `rgb` is the squared error per colour channel, flattened ray by ray.
    /// `opacity` is present only when `lambda_opacity > 0` and opacities are
    /// given; `distortion` only when `lambda_distortion > 0` and inputs are given.
    pub fn compute(
        &self,
        rgb: &[Vec3],
        target: &[Vec3],
        opacity: Option<&[f32]>,
        distortion: Option<&DistortionInputs<'_>>,
    ) -> TrainResult<LossTerms> {
        if rgb.len() != target.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} predicted colours for {} targets",
                rgb.len(),
                target.len()
            )));
        }

        let mut terms = LossTerms::new();
        let squared = rgb
            .iter()
            .zip(target)
            .flat_map(|(p, t)| ((*p - *t) * (*p - *t)).to_array())
            .collect();
        terms.insert(LossTerm::Rgb, squared);

        if self.lambda_opacity > 0.0 {
            if let Some(opacity) = opacity {
                let penalty = opacity
                    .iter()
                    .map(|&o| {
                        let o = o + OPACITY_EPSILON;
                        self.lambda_opacity * (-o * o.ln())
                    })
                    .collect();
                terms.insert(LossTerm::Opacity, penalty);
            }
        }

        if self.lambda_distortion > 0.0 {
            if let Some(inputs) = distortion {
                inputs.validate()?;
                let kernel = self.kernel.as_ref().ok_or_else(|| {
                    TrainError::InvalidConfiguration(
                        "distortion inputs supplied without a distortion kernel".into(),
                    )
                })?;
                let values = kernel.evaluate(inputs)?;
                terms.insert(
                    LossTerm::Distortion,
                    values.into_iter().map(|v| self.lambda_distortion * v).collect(),
                );
            }
        }

        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Sum of weights per ray, enough to check the call contract.
    struct WeightSum;

    impl DistortionKernel for WeightSum {
        fn evaluate(&self, inputs: &DistortionInputs<'_>) -> TrainResult<Vec<f32>> {
            Ok(inputs
                .segments
                .iter()
                .map(|s| inputs.weights[s.start..s.start + s.count].iter().sum())
                .collect())
        }
    }

    fn colours() -> (Vec<Vec3>, Vec<Vec3>) {
        (
            vec![Vec3::new(0.5, 0.2, 1.0), Vec3::ZERO],
            vec![Vec3::new(0.0, 0.2, 0.5), Vec3::ONE],
        )
    }

    #[test]
    fn test_rgb_is_elementwise_squared_error() {
        let (rgb, target) = colours();
        let terms = LossAggregator::default().compute(&rgb, &target, None, None).unwrap();
        assert_eq!(terms[&LossTerm::Rgb], vec![0.25, 0.0, 0.25, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_opacity_omitted_when_disabled_or_missing() {
        let (rgb, target) = colours();
        let opacity = [0.3, 0.9];

        let off = LossAggregator::new(0.0, 0.0);
        let terms = off.compute(&rgb, &target, Some(&opacity), None).unwrap();
        assert!(!terms.contains_key(&LossTerm::Opacity));

        let on = LossAggregator::new(1e-3, 0.0);
        let terms = on.compute(&rgb, &target, None, None).unwrap();
        assert!(!terms.contains_key(&LossTerm::Opacity));
        assert_eq!(terms.len(), 1);
    }

    #[test]
    fn test_opacity_entropy_penalty() {
        let (rgb, target) = colours();
        let agg = LossAggregator::new(0.5, 0.0);
        let terms = agg.compute(&rgb, &target, Some(&[0.0, 1.0]), None).unwrap();
        let opacity = &terms[&LossTerm::Opacity];
        let o = OPACITY_EPSILON;
        assert_relative_eq!(opacity[0], 0.5 * (-o * o.ln()), epsilon = 1e-7);
        let o = 1.0 + OPACITY_EPSILON;
        assert_relative_eq!(opacity[1], 0.5 * (-o * o.ln()), epsilon = 1e-7);
        assert!(opacity[0].is_finite());
    }

    #[test]
    fn test_distortion_scaled_by_weight() {
        let (rgb, target) = colours();
        let weights = [0.1, 0.2, 0.3, 0.4, 0.5];
        let zeros = [0.0; 5];
        let segments = [RaySegment { start: 0, count: 2 }, RaySegment { start: 2, count: 3 }];
        let inputs = DistortionInputs {
            weights: &weights,
            deltas: &zeros,
            ts: &zeros,
            segments: &segments,
        };
        let agg = LossAggregator::new(0.0, 0.01).with_distortion_kernel(Box::new(WeightSum));
        let terms = agg.compute(&rgb, &target, None, Some(&inputs)).unwrap();
        let d = &terms[&LossTerm::Distortion];
        assert_relative_eq!(d[0], 0.003, epsilon = 1e-7);
        assert_relative_eq!(d[1], 0.012, epsilon = 1e-7);
    }

    #[test]
    fn test_distortion_errors() {
        let (rgb, target) = colours();
        let weights = [0.1, 0.2];
        let zeros = [0.0; 2];
        let segments = [RaySegment { start: 1, count: 2 }];
        let bad_segment = DistortionInputs {
            weights: &weights,
            deltas: &zeros,
            ts: &zeros,
            segments: &segments,
        };
        let agg = LossAggregator::default().with_distortion_kernel(Box::new(WeightSum));
        assert!(matches!(
            agg.compute(&rgb, &target, None, Some(&bad_segment)),
            Err(TrainError::ShapeMismatch(_))
        ));

        let ok = DistortionInputs {
            segments: &[],
            ..bad_segment
        };
        assert!(matches!(
            LossAggregator::default().compute(&rgb, &target, None, Some(&ok)),
            Err(TrainError::InvalidConfiguration(_))
        ));
        // a zero weight skips the term even without a kernel
        let terms = LossAggregator::new(0.0, 0.0)
            .compute(&rgb, &target, None, Some(&ok))
            .unwrap();
        assert!(!terms.contains_key(&LossTerm::Distortion));
    }

    #[test]
    fn test_segment_end_overflow_is_rejected() {
        let weights = [0.1, 0.2];
        let zeros = [0.0; 2];
        let segments = [RaySegment {
            start: usize::MAX,
            count: 2,
        }];
        let inputs = DistortionInputs {
            weights: &weights,
            deltas: &zeros,
            ts: &zeros,
            segments: &segments,
        };
        assert!(matches!(inputs.validate(), Err(TrainError::ShapeMismatch(_))));
    }

    #[test]
    fn test_mismatched_colours() {
        let agg = LossAggregator::default();
        assert!(agg.compute(&[Vec3::ZERO], &[], None, None).is_err());
    }
}
