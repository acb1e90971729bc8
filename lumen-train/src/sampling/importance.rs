//! Loss-driven importance sampling of float pixel coordinates.

use super::{BatchShape, ImageIds, PixelSample, PixelSampler, RayAllocation, SampleRequest};
use crate::error::{TrainError, TrainResult};
use glam::Vec2;
use ordered_float::OrderedFloat;
use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Feedback from the previous training step, one entry per ray.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceSignal<'a> {
    pub loss_per_ray: &'a [f32],
    /// Gradient of the loss with respect to each ray's `(x, y)` pixel coordinate.
    pub coordinate_grad: Option<&'a [Vec2]>,
}

/// Produces the float pixel coordinates of the next batch.
pub trait PixelProposal {
    /// One `(x, y)` point per ray. `signal` is `None` on the first step.
    fn propose(
        &mut self,
        signal: Option<&ImportanceSignal<'_>>,
        rng: &mut dyn RngCore,
    ) -> TrainResult<Vec<Vec2>>;

    /// Change the number of points proposed per call.
    fn resize(&mut self, num_points: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LangevinParams {
    /// Scale applied to the coordinate gradient.
    pub step_size: f32,
    /// Standard deviation of the Gaussian perturbation, in pixels.
    pub noise_scale: f32,
    /// Fraction of points redrawn uniformly every step.
    pub min_fraction: f32,
    /// Fraction of lowest-loss points redrawn every step.
    pub loss_min_fraction: f32,
}

impl Default for LangevinParams {
    fn default() -> Self {
        Self {
            step_size: 1.0,
            noise_scale: 0.5,
            min_fraction: 0.1,
            loss_min_fraction: 0.1,
        }
    }
}

/// Keeps one point per ray and moves it towards high loss with Langevin steps.
#[derive(Debug, Clone)]
pub struct LangevinProposal {
    width: u32,
    height: u32,
    num_points: usize,
    params: LangevinParams,
    points: Vec<Vec2>,
}

impl LangevinProposal {
    pub fn new(width: u32, height: u32, num_points: usize, params: LangevinParams) -> Self {
        Self {
            width,
            height,
            num_points,
            params,
            points: Vec::new(),
        }
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    fn max_corner(&self) -> Vec2 {
        Vec2::new(
            self.width.saturating_sub(1) as f32,
            self.height.saturating_sub(1) as f32,
        )
    }

    fn uniform_point(&self, rng: &mut dyn RngCore) -> Vec2 {
        let max = self.max_corner();
        Vec2::new(rng.random_range(0.0..=max.x), rng.random_range(0.0..=max.y))
    }

    fn check_signal(&self, signal: &ImportanceSignal<'_>) -> TrainResult<()> {
        let n = self.points.len();
        if signal.loss_per_ray.len() != n {
            return Err(TrainError::ShapeMismatch(format!(
                "expected {n} per-ray losses, got {}",
                signal.loss_per_ray.len()
            )));
        }
        if let Some(grad) = signal.coordinate_grad {
            if grad.len() != n {
                return Err(TrainError::ShapeMismatch(format!(
                    "expected {n} coordinate gradients, got {}",
                    grad.len()
                )));
            }
        }
        Ok(())
    }
}

impl PixelProposal for LangevinProposal {
    fn propose(
        &mut self,
        signal: Option<&ImportanceSignal<'_>>,
        rng: &mut dyn RngCore,
    ) -> TrainResult<Vec<Vec2>> {
        let Some(signal) = signal.filter(|_| self.points.len() == self.num_points) else {
            self.points = (0..self.num_points).map(|_| self.uniform_point(rng)).collect();
            return Ok(self.points.clone());
        };
        self.check_signal(signal)?;

        let LangevinParams {
            step_size,
            noise_scale,
            min_fraction,
            loss_min_fraction,
        } = self.params;

        for (i, point) in self.points.iter_mut().enumerate() {
            let grad = signal.coordinate_grad.map_or(Vec2::ZERO, |g| g[i]);
            let noise = Vec2::new(rng.sample(StandardNormal), rng.sample(StandardNormal));
            *point += step_size * grad + noise_scale * noise;
        }

        let n = self.points.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| OrderedFloat(signal.loss_per_ray[i]));
        let lowest = (loss_min_fraction * n as f32).floor() as usize;
        for &i in &order[..lowest.min(n)] {
            self.points[i] = self.uniform_point(rng);
        }
        for i in 0..n {
            if rng.random::<f32>() < min_fraction {
                self.points[i] = self.uniform_point(rng);
            }
        }

        let max = self.max_corner();
        for point in &mut self.points {
            *point = point.clamp(Vec2::ZERO, max);
        }
        Ok(self.points.clone())
    }

    fn resize(&mut self, num_points: usize) {
        self.num_points = num_points;
        self.points.clear();
    }
}

/// Training sampler that asks a [`PixelProposal`] where to look.
///
/// Rays are laid out per image, `allocation.per_image` consecutive rays for
/// each training view.
pub struct ImportanceSampler {
    allocation: RayAllocation,
    proposal: Box<dyn PixelProposal>,
}

impl ImportanceSampler {
    pub fn new(allocation: RayAllocation, mut proposal: Box<dyn PixelProposal>) -> Self {
        proposal.resize(allocation.total());
        Self {
            allocation,
            proposal,
        }
    }
}

impl PixelSampler for ImportanceSampler {
    fn sample(&mut self, request: SampleRequest<'_>, rng: &mut dyn RngCore) -> TrainResult<PixelSample> {
        let points = self.proposal.propose(request.signal, rng)?;
        let n = self.allocation.total();
        if points.len() != n {
            return Err(TrainError::ShapeMismatch(format!(
                "proposal returned {} points for {n} rays",
                points.len()
            )));
        }
        let (x, y) = points.iter().map(|p| (p.x, p.y)).unzip();
        Ok(PixelSample {
            image_ids: ImageIds::PerRay(self.allocation.image_ids()),
            x,
            y,
            shape: BatchShape::Rays(n),
            points_2d: Some(points),
        })
    }

    fn num_rays(&self) -> usize {
        self.allocation.total()
    }

    fn set_allocation(&mut self, allocation: RayAllocation) {
        self.allocation = allocation;
        self.proposal.resize(allocation.total());
    }
}
