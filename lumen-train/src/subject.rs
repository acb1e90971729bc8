//! Per-subject loader producing one ray batch per training step.

use crate::config::{BackgroundMode, SamplingType, SubjectConfig};
use crate::error::{TrainError, TrainResult};
use crate::pixels::sample_rgb;
use crate::rays::{CameraConvention, CameraRays, NdcProjector, RayBatch, direction_jacobian, rays_for};
use crate::sampling::{
    BatchShape, ImageIds, ImportanceSampler, ImportanceSignal, LangevinParams, LangevinProposal,
    PixelSample, PixelSampler, RayAllocation, SampleRequest, UniformSampler,
};
use glam::{Vec2, Vec3};
use image::RgbImage;
use lumen_data::{HomogeneousTransform, Intrinsics, LlffDataset, RenderPath, load_llff_data};
use rand::{Rng, RngCore};
use tracing::{debug, info, warn};

/// Everything a training step consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    /// Target colours in `[0, 1]`, one per ray.
    pub pixels: Vec<Vec3>,
    /// NDC rays.
    pub rays: RayBatch,
    /// World-space unit view directions.
    pub viewdirs: Vec<Vec3>,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub image_ids: ImageIds,
    pub color_bkgd: Vec3,
    pub shape: BatchShape,
    /// Float pixel coordinates from an importance proposal.
    pub points_2d: Option<Vec<Vec2>>,
    /// `(d dir / dx, d dir / dy)` per ray, present with `points_2d`.
    pub direction_jacobians: Option<Vec<(Vec3, Vec3)>>,
}

impl TrainingBatch {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// One split of a subject, with its sampler.
pub struct SubjectLoader {
    config: SubjectConfig,
    images: Vec<RgbImage>,
    c2ws: Vec<HomogeneousTransform>,
    intrinsics: Intrinsics,
    width: u32,
    height: u32,
    render_path: RenderPath,
    holdout_view: usize,
    projector: NdcProjector,
    convention: CameraConvention,
    training: bool,
    requested_num_rays: Option<usize>,
    uniform: UniformSampler,
    importance: Option<ImportanceSampler>,
}

impl SubjectLoader {
    /// Load `config.subject_id` from disk and prepare the requested split.
    #[tracing::instrument(skip_all, fields(subject = %config.subject_id, split = %config.split))]
    pub fn new(config: SubjectConfig) -> TrainResult<Self> {
        config.validate()?;
        let dataset = load_llff_data(&config.root, config.subject_id.as_str(), &config.llff_options())?;
        Self::from_dataset(config, &dataset)
    }

    /// Build a loader over an already loaded dataset.
    pub fn from_dataset(config: SubjectConfig, dataset: &LlffDataset) -> TrainResult<Self> {
        config.validate()?;
        let (images, c2ws) = dataset.split_views(config.split);
        if images.is_empty() {
            return Err(TrainError::InvalidConfiguration(format!(
                "split '{}' of '{}' has no images",
                config.split, config.subject_id
            )));
        }
        let (width, height) = dataset.resolution();
        if images.iter().any(|img| img.dimensions() != (width, height)) {
            return Err(TrainError::InvalidConfiguration(
                "images of a split must share one resolution".into(),
            ));
        }

        let intrinsics = dataset.intrinsics();
        let projector = NdcProjector::new(height, width, intrinsics.fx, config.ndc_near);
        let training = config.is_training();
        let convention = config.camera_convention();

        let (uniform, importance) = match (training, config.num_rays) {
            (true, Some(requested)) => {
                let allocation = allocate(requested, images.len());
                let uniform = UniformSampler::training(
                    width,
                    height,
                    images.len(),
                    allocation,
                    config.batch_over_images,
                );
                let importance = (config.sampling_type == SamplingType::Learned).then(|| {
                    let params = LangevinParams {
                        min_fraction: config.min_fraction,
                        loss_min_fraction: config.loss_min_fraction,
                        ..LangevinParams::default()
                    };
                    let proposal = LangevinProposal::new(width, height, allocation.total(), params);
                    ImportanceSampler::new(allocation, Box::new(proposal))
                });
                (uniform, importance)
            }
            _ => (UniformSampler::evaluation(width, height, images.len()), None),
        };

        info!(
            images = images.len(),
            width,
            height,
            focal = intrinsics.fx,
            training,
            sampling = ?config.sampling_type,
            "subject loader ready"
        );

        Ok(Self {
            requested_num_rays: config.num_rays,
            images,
            c2ws,
            intrinsics,
            width,
            height,
            render_path: dataset.render_path().clone(),
            holdout_view: dataset.holdout_view(),
            projector,
            convention,
            training,
            uniform,
            importance,
            config,
        })
    }

    pub fn config(&self) -> &SubjectConfig {
        &self.config
    }

    /// Number of images in the split.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Rays per batch actually produced, after per-image rounding.
    pub fn num_rays(&self) -> usize {
        self.uniform.num_rays()
    }

    pub fn requested_num_rays(&self) -> Option<usize> {
        self.requested_num_rays
    }

    /// Change the training ray budget. Ignored in evaluation mode.
    pub fn update_num_rays(&mut self, num_rays: usize) -> TrainResult<usize> {
        if num_rays == 0 {
            return Err(TrainError::InvalidConfiguration("num_rays must be positive".into()));
        }
        if !self.training {
            debug!(num_rays, "ignoring ray budget update in evaluation mode");
            return Ok(self.num_rays());
        }
        let allocation = allocate(num_rays, self.images.len());
        self.requested_num_rays = Some(num_rays);
        self.uniform.set_allocation(allocation);
        if let Some(importance) = &mut self.importance {
            importance.set_allocation(allocation);
        }
        Ok(allocation.total())
    }

    pub fn images(&self) -> &[RgbImage] {
        &self.images
    }

    pub fn camtoworlds(&self) -> &[HomogeneousTransform] {
        &self.c2ws
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// (width, height)
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn render_path(&self) -> &RenderPath {
        &self.render_path
    }

    pub fn holdout_view(&self) -> usize {
        self.holdout_view
    }

    pub fn projector(&self) -> &NdcProjector {
        &self.projector
    }

    /// Batch from whichever sampler the loader was configured with.
    ///
    /// `index` is used by the uniform sampler, `signal` by the importance sampler.
    pub fn next_batch(
        &mut self,
        index: usize,
        signal: Option<&ImportanceSignal<'_>>,
        rng: &mut dyn RngCore,
    ) -> TrainResult<TrainingBatch> {
        if self.importance.is_some() {
            self.fetch_importance(signal, rng)
        } else {
            self.fetch(index, rng)
        }
    }

    /// Batch from the uniform sampler. `index` selects the view in evaluation
    /// and when batches are not spread across images.
    pub fn fetch(&mut self, index: usize, rng: &mut dyn RngCore) -> TrainResult<TrainingBatch> {
        if self.importance.is_some() {
            return Err(TrainError::InvalidConfiguration(
                "loader is configured for learned sampling".into(),
            ));
        }
        let sample = self.uniform.sample(SampleRequest::index(index), rng)?;
        self.assemble(sample, rng)
    }

    /// Batch from the importance sampler, fed with the previous step's loss.
    pub fn fetch_importance(
        &mut self,
        signal: Option<&ImportanceSignal<'_>>,
        rng: &mut dyn RngCore,
    ) -> TrainResult<TrainingBatch> {
        let sampler = self.importance.as_mut().ok_or_else(|| {
            TrainError::InvalidConfiguration("loader is not configured for learned sampling".into())
        })?;
        let sample = sampler.sample(SampleRequest { index: 0, signal }, rng)?;
        self.assemble(sample, rng)
    }

    /// Background colour for the next batch. Evaluation always uses white.
    pub fn background(&self, rng: &mut dyn RngCore) -> Vec3 {
        if !self.training {
            return Vec3::ONE;
        }
        match self.config.color_bkgd_aug {
            BackgroundMode::Random => Vec3::new(rng.random(), rng.random(), rng.random()),
            BackgroundMode::White => Vec3::ONE,
            BackgroundMode::Black => Vec3::ZERO,
            BackgroundMode::Gray => Vec3::splat(0.5),
        }
    }

    fn assemble(&self, sample: PixelSample, rng: &mut dyn RngCore) -> TrainResult<TrainingBatch> {
        let PixelSample {
            image_ids,
            x,
            y,
            shape,
            points_2d,
        } = sample;

        let pixels = x
            .iter()
            .zip(&y)
            .enumerate()
            .map(|(i, (&px, &py))| sample_rgb(&self.images[image_ids.get(i)], px, py))
            .collect();
        let world = rays_for(&self.c2ws, &self.intrinsics, self.convention, &image_ids, &x, &y);
        let viewdirs = world.viewdirs();
        let unit = CameraRays {
            origins: world.origins,
            directions: viewdirs.clone(),
        };
        let rays = self.projector.project(&unit);

        let direction_jacobians = points_2d.as_ref().map(|points| {
            (0..points.len())
                .map(|i| direction_jacobian(&self.c2ws[image_ids.get(i)], &self.intrinsics, self.convention))
                .collect()
        });

        Ok(TrainingBatch {
            pixels,
            rays,
            viewdirs,
            x,
            y,
            image_ids,
            color_bkgd: self.background(rng),
            shape,
            points_2d,
            direction_jacobians,
        })
    }
}

fn allocate(requested: usize, images: usize) -> RayAllocation {
    let allocation = RayAllocation::new(requested, images);
    if allocation.is_rounded() {
        warn!(
            requested,
            images,
            realized = allocation.total(),
            "num_rays is not divisible by the number of images, rounding up"
        );
    }
    allocation
}
