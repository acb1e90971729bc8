//! Uniform integer pixel sampling.

use super::{BatchShape, ImageIds, PixelSample, PixelSampler, RayAllocation, SampleRequest};
use crate::error::{TrainError, TrainResult};
use rand::{Rng, RngCore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Training {
        allocation: RayAllocation,
        batch_over_images: bool,
    },
    /// Every pixel of the requested view, once.
    Evaluation,
}

/// Samples pixels uniformly at random in training and densely in evaluation.
#[derive(Debug, Clone)]
pub struct UniformSampler {
    width: u32,
    height: u32,
    images: usize,
    mode: Mode,
}

impl UniformSampler {
    pub fn training(
        width: u32,
        height: u32,
        images: usize,
        allocation: RayAllocation,
        batch_over_images: bool,
    ) -> Self {
        Self {
            width,
            height,
            images,
            mode: Mode::Training {
                allocation,
                batch_over_images,
            },
        }
    }

    pub fn evaluation(width: u32, height: u32, images: usize) -> Self {
        Self {
            width,
            height,
            images,
            mode: Mode::Evaluation,
        }
    }

    pub fn is_training(&self) -> bool {
        matches!(self.mode, Mode::Training { .. })
    }

    fn check_index(&self, index: usize) -> TrainResult<()> {
        if index >= self.images {
            return Err(TrainError::InvalidConfiguration(format!(
                "image index {index} out of range for {} images",
                self.images
            )));
        }
        Ok(())
    }

    /// Row-major grid: x varies fastest.
    fn dense_grid(&self) -> (Vec<f32>, Vec<f32>) {
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x as f32, y as f32)))
            .unzip()
    }
}

impl PixelSampler for UniformSampler {
    fn sample(&mut self, request: SampleRequest<'_>, rng: &mut dyn RngCore) -> TrainResult<PixelSample> {
        match self.mode {
            Mode::Training {
                allocation,
                batch_over_images,
            } => {
                let n = allocation.total();
                let image_ids = if batch_over_images {
                    ImageIds::PerRay((0..n).map(|_| rng.random_range(0..self.images)).collect())
                } else {
                    self.check_index(request.index)?;
                    ImageIds::Single(request.index)
                };
                let x = (0..n).map(|_| rng.random_range(0..self.width) as f32).collect();
                let y = (0..n).map(|_| rng.random_range(0..self.height) as f32).collect();
                Ok(PixelSample {
                    image_ids,
                    x,
                    y,
                    shape: BatchShape::Rays(n),
                    points_2d: None,
                })
            }
            Mode::Evaluation => {
                self.check_index(request.index)?;
                let (x, y) = self.dense_grid();
                Ok(PixelSample {
                    image_ids: ImageIds::Single(request.index),
                    x,
                    y,
                    shape: BatchShape::Image {
                        height: self.height,
                        width: self.width,
                    },
                    points_2d: None,
                })
            }
        }
    }

    fn num_rays(&self) -> usize {
        match self.mode {
            Mode::Training { allocation, .. } => allocation.total(),
            Mode::Evaluation => self.width as usize * self.height as usize,
        }
    }

    fn set_allocation(&mut self, new: RayAllocation) {
        if let Mode::Training { allocation, .. } = &mut self.mode {
            *allocation = new;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn test_evaluation_covers_every_pixel_once() {
        let mut sampler = UniformSampler::evaluation(5, 3, 2);
        let mut rng = StdRng::seed_from_u64(0);
        let sample = sampler.sample(SampleRequest::index(1), &mut rng).unwrap();

        assert_eq!(sample.len(), 15);
        assert_eq!(sample.shape, BatchShape::Image { height: 3, width: 5 });
        assert_eq!(sample.image_ids, ImageIds::Single(1));
        let unique: HashSet<(u32, u32)> = sample
            .x
            .iter()
            .zip(&sample.y)
            .map(|(&x, &y)| (x as u32, y as u32))
            .collect();
        assert_eq!(unique.len(), 15);
        // x varies fastest
        assert_eq!(&sample.x[..6], &[0.0, 1.0, 2.0, 3.0, 4.0, 0.0]);
        assert_eq!(&sample.y[..6], &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_evaluation_rejects_bad_index() {
        let mut sampler = UniformSampler::evaluation(5, 3, 2);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(sampler.sample(SampleRequest::index(2), &mut rng).is_err());
    }

    #[test]
    fn test_training_draws_in_bounds() {
        let alloc = RayAllocation::new(100, 7);
        let mut sampler = UniformSampler::training(8, 6, 7, alloc, true);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = sampler.sample(SampleRequest::index(0), &mut rng).unwrap();

        assert_eq!(sample.len(), 105);
        assert_eq!(sample.shape, BatchShape::Rays(105));
        assert!(sample.x.iter().all(|&x| (0.0..8.0).contains(&x) && x.fract() == 0.0));
        assert!(sample.y.iter().all(|&y| (0.0..6.0).contains(&y)));
        let ImageIds::PerRay(ids) = &sample.image_ids else {
            panic!("expected per-ray image ids");
        };
        assert!(ids.iter().all(|&id| id < 7));
    }

    #[test]
    fn test_training_single_image_uses_request_index() {
        let alloc = RayAllocation::new(10, 3);
        let mut sampler = UniformSampler::training(4, 4, 3, alloc, false);
        let mut rng = StdRng::seed_from_u64(1);
        let sample = sampler.sample(SampleRequest::index(2), &mut rng).unwrap();
        assert_eq!(sample.image_ids, ImageIds::Single(2));
        assert_eq!(sample.len(), 12);
    }

    #[test]
    fn test_same_seed_same_batch() {
        let alloc = RayAllocation::new(32, 4);
        let mut a = UniformSampler::training(16, 16, 4, alloc, true);
        let mut b = a.clone();
        let first = a.sample(SampleRequest::index(0), &mut StdRng::seed_from_u64(3)).unwrap();
        let second = b.sample(SampleRequest::index(0), &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_set_allocation_changes_batch_size() {
        let mut sampler = UniformSampler::training(4, 4, 2, RayAllocation::new(8, 2), true);
        sampler.set_allocation(RayAllocation::new(9, 2));
        assert_eq!(sampler.num_rays(), 10);
    }
}
