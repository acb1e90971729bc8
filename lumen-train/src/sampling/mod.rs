//! Pixel sampling strategies.
//!
//! A [`PixelSampler`] decides which pixels of which views make up a batch.
//! Two implementations exist: [`UniformSampler`] draws integer pixels
//! uniformly (or enumerates a whole image in evaluation), and
//! [`ImportanceSampler`] delegates to a [`PixelProposal`] fed with the
//! previous step's per-ray loss.

pub mod importance;
pub mod uniform;

pub use importance::{ImportanceSampler, ImportanceSignal, LangevinParams, LangevinProposal, PixelProposal};
pub use uniform::UniformSampler;

use crate::error::TrainResult;
use glam::Vec2;
use rand::RngCore;

/// Image index for each ray of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageIds {
    /// Every ray comes from the same view.
    Single(usize),
    PerRay(Vec<usize>),
}

impl ImageIds {
    /// Image index of ray `ray`.
    pub fn get(&self, ray: usize) -> usize {
        match self {
            ImageIds::Single(id) => *id,
            ImageIds::PerRay(ids) => ids[ray],
        }
    }

    /// Expand to one id per ray.
    pub fn to_vec(&self, rays: usize) -> Vec<usize> {
        match self {
            ImageIds::Single(id) => vec![*id; rays],
            ImageIds::PerRay(ids) => ids.clone(),
        }
    }
}

/// Layout of a batch: a flat list of rays or a full image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchShape {
    Rays(usize),
    Image { height: u32, width: u32 },
}

impl BatchShape {
    pub fn num_rays(&self) -> usize {
        match self {
            BatchShape::Rays(n) => *n,
            BatchShape::Image { height, width } => *height as usize * *width as usize,
        }
    }
}

/// Pixels chosen for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSample {
    pub image_ids: ImageIds,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub shape: BatchShape,
    /// Float `(x, y)` coordinates produced by an importance proposal.
    pub points_2d: Option<Vec<Vec2>>,
}

impl PixelSample {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// How many rays a training step draws.
///
/// The request is split evenly across the training images and the per-image
/// count is rounded up, so the realized total can exceed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayAllocation {
    pub requested: usize,
    pub per_image: usize,
    pub images: usize,
}

impl RayAllocation {
    pub fn new(requested: usize, images: usize) -> Self {
        let images = images.max(1);
        Self {
            requested,
            per_image: requested.div_ceil(images),
            images,
        }
    }

    pub fn total(&self) -> usize {
        self.per_image * self.images
    }

    pub fn is_rounded(&self) -> bool {
        self.total() != self.requested
    }

    /// `[0, 0, .., 1, 1, ..]` with `per_image` copies of each image index.
    pub fn image_ids(&self) -> Vec<usize> {
        (0..self.images)
            .flat_map(|id| std::iter::repeat_n(id, self.per_image))
            .collect()
    }
}

/// What the caller asks of a sampler on each step.
#[derive(Debug, Clone, Copy)]
pub struct SampleRequest<'a> {
    /// View to sample from when batches are not spread across all images.
    pub index: usize,
    /// Previous step's loss, used by importance samplers.
    pub signal: Option<&'a ImportanceSignal<'a>>,
}

impl SampleRequest<'_> {
    pub fn index(index: usize) -> Self {
        Self {
            index,
            signal: None,
        }
    }
}

/// Chooses pixels for a batch.
pub trait PixelSampler {
    fn sample(&mut self, request: SampleRequest<'_>, rng: &mut dyn RngCore) -> TrainResult<PixelSample>;

    /// Rays produced per training call.
    fn num_rays(&self) -> usize;

    /// Change the per-step ray budget.
    fn set_allocation(&mut self, allocation: RayAllocation);
}
