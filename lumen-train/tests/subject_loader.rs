use approx::assert_abs_diff_eq;
use glam::{Vec2, Vec3};
use image::{Rgb, RgbImage};
use lumen_data::{ArchiveRow, Bounds, LlffOptions, Split, encode_pose_archive, load_llff_data};
use lumen_train::sampling::{BatchShape, ImageIds};
use lumen_train::{
    BackgroundMode, ImportanceSignal, SamplingType, SubjectConfig, SubjectId, SubjectLoader, TrainError,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

const WIDTH: u32 = 16;
const HEIGHT: u32 = 12;

fn row(position: Vec3, near: f32) -> ArchiveRow {
    // LLFF column order is [down, right, back]
    let columns = [
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        position,
        Vec3::new(48.0, 64.0, 60.0),
    ];
    let mut pose = [0.0; 15];
    for r in 0..3 {
        for c in 0..5 {
            pose[r * 5 + c] = columns[c][r];
        }
    }
    ArchiveRow {
        pose,
        bounds: Bounds::new(near, 20.0),
    }
}

fn view_image(view: usize) -> RgbImage {
    RgbImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgb([(x * 15) as u8, (y * 20) as u8, (view * 10) as u8])
    })
}

/// Writes `<root>/fern` with `count` views at factor 4 (16x12 images).
fn write_subject(root: &Path, count: usize) {
    let subject = root.join("fern");
    let images = subject.join("images_4");
    std::fs::create_dir_all(&images).unwrap();
    let rows: Vec<ArchiveRow> = (0..count)
        .map(|i| {
            let position = Vec3::new((i % 4) as f32 * 0.1, (i / 4) as f32 * 0.1, 0.0);
            row(position, 2.0 + 0.05 * i as f32)
        })
        .collect();
    std::fs::write(subject.join("poses_bounds.npy"), encode_pose_archive(&rows)).unwrap();
    for i in 0..count {
        view_image(i).save(images.join(format!("IMG_{i:03}.png"))).unwrap();
    }
}

fn config(root: &Path) -> SubjectConfig {
    SubjectConfig {
        subject_id: SubjectId::Fern,
        root: root.to_path_buf(),
        ..SubjectConfig::default()
    }
}

fn training_config(root: &Path, num_rays: usize) -> SubjectConfig {
    SubjectConfig {
        num_rays: Some(num_rays),
        split: Split::Train,
        ..config(root)
    }
}

#[test]
fn test_split_of_twenty_four_views() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 24);

    let dataset = load_llff_data(tmp.path(), "fern", &LlffOptions::default()).unwrap();
    assert_eq!(dataset.splits().test, vec![0, 8, 16]);
    assert_eq!(dataset.splits().train.len(), 21);

    let test = SubjectLoader::new(SubjectConfig {
        split: Split::Test,
        ..config(tmp.path())
    })
    .unwrap();
    assert_eq!(test.len(), 3);
    assert!(!test.is_training());

    let train = SubjectLoader::new(config(tmp.path())).unwrap();
    assert_eq!(train.len(), 21);
}

#[test]
fn test_training_rounds_ray_count_up() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);

    let mut loader = SubjectLoader::new(training_config(tmp.path(), 100)).unwrap();
    assert_eq!(loader.len(), 7);
    assert!(loader.is_training());
    assert_eq!(loader.requested_num_rays(), Some(100));
    assert_eq!(loader.num_rays(), 105);

    let mut rng = StdRng::seed_from_u64(0);
    let batch = loader.fetch(0, &mut rng).unwrap();
    assert_eq!(batch.len(), 105);
    assert_eq!(batch.rays.len(), 105);
    assert_eq!(batch.viewdirs.len(), 105);
    assert_eq!(batch.shape, BatchShape::Rays(105));
    assert!(batch.points_2d.is_none());
    assert!(batch.pixels.iter().all(|p| p.cmpge(Vec3::ZERO).all() && p.cmple(Vec3::ONE).all()));
    assert_eq!(batch.color_bkgd, Vec3::splat(0.5));

    assert_eq!(loader.update_num_rays(50).unwrap(), 56);
    assert_eq!(loader.num_rays(), 56);
    assert_eq!(loader.fetch(0, &mut rng).unwrap().len(), 56);
}

#[test]
fn test_evaluation_returns_whole_image() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 9);

    let mut loader = SubjectLoader::new(SubjectConfig {
        split: Split::Test,
        color_bkgd_aug: BackgroundMode::Black,
        ..config(tmp.path())
    })
    .unwrap();
    assert_eq!(loader.len(), 2);
    assert_eq!(loader.num_rays(), (WIDTH * HEIGHT) as usize);

    let mut rng = StdRng::seed_from_u64(1);
    let batch = loader.fetch(1, &mut rng).unwrap();
    assert_eq!(batch.len(), (WIDTH * HEIGHT) as usize);
    assert_eq!(batch.shape, BatchShape::Image { height: HEIGHT, width: WIDTH });
    assert_eq!(batch.image_ids, ImageIds::Single(1));
    assert_eq!(batch.color_bkgd, Vec3::ONE);

    let unique: HashSet<(u32, u32)> = batch
        .x
        .iter()
        .zip(&batch.y)
        .map(|(&x, &y)| (x as u32, y as u32))
        .collect();
    assert_eq!(unique.len(), (WIDTH * HEIGHT) as usize);

    // test view 1 is dataset view 8
    let expected = view_image(8);
    for (i, pixel) in batch.pixels.iter().enumerate() {
        let [r, g, b] = expected.get_pixel(batch.x[i] as u32, batch.y[i] as u32).0;
        assert_eq!(*pixel, Vec3::new(r as f32, g as f32, b as f32) / 255.0);
    }

    assert!(loader.fetch(2, &mut rng).is_err());
}

#[test]
fn test_seeded_batches_are_reproducible() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);
    let config = SubjectConfig {
        color_bkgd_aug: BackgroundMode::Random,
        ..training_config(tmp.path(), 64)
    };

    let mut a = SubjectLoader::new(config.clone()).unwrap();
    let mut b = SubjectLoader::new(config).unwrap();
    let first = a.fetch(0, &mut StdRng::seed_from_u64(42)).unwrap();
    let second = b.fetch(0, &mut StdRng::seed_from_u64(42)).unwrap();
    assert_eq!(first, second);
    assert!(first.color_bkgd.cmpge(Vec3::ZERO).all() && first.color_bkgd.cmplt(Vec3::ONE).all());

    let third = a.fetch(0, &mut StdRng::seed_from_u64(43)).unwrap();
    assert_ne!(first.x, third.x);
}

#[test]
fn test_rays_are_projected_to_ndc() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);
    let mut loader = SubjectLoader::new(training_config(tmp.path(), 28)).unwrap();
    let batch = loader.fetch(0, &mut StdRng::seed_from_u64(5)).unwrap();
    let projector = *loader.projector();

    for i in 0..batch.len() {
        let viewdir = batch.viewdirs[i];
        assert_abs_diff_eq!(viewdir.length(), 1.0, epsilon = 1e-5);

        // NDC origins sit on the near plane
        let start = projector.ndc_to_world(batch.rays.origins[i]).unwrap();
        assert_abs_diff_eq!(start.z, -projector.near, epsilon = 1e-4);

        let along = projector
            .ndc_to_world(batch.rays.origins[i] + 0.5 * batch.rays.directions[i])
            .unwrap();
        let recovered = (along - start).normalize();
        assert!(recovered.abs_diff_eq(viewdir, 1e-3));
    }
}

#[test]
fn test_importance_sampling_batches() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);
    let mut loader = SubjectLoader::new(SubjectConfig {
        sampling_type: SamplingType::Learned,
        ..training_config(tmp.path(), 64)
    })
    .unwrap();
    assert_eq!(loader.num_rays(), 70);

    let mut rng = StdRng::seed_from_u64(8);
    let first = loader.fetch_importance(None, &mut rng).unwrap();
    assert_eq!(first.len(), 70);
    let points = first.points_2d.as_ref().unwrap();
    assert_eq!(points.len(), 70);
    assert_eq!(first.direction_jacobians.as_ref().unwrap().len(), 70);
    assert_eq!(first.image_ids.get(0), 0);
    assert_eq!(first.image_ids.get(69), 6);
    assert!(points.iter().all(|p| p.cmpge(Vec2::ZERO).all()
        && p.cmple(Vec2::new((WIDTH - 1) as f32, (HEIGHT - 1) as f32)).all()));

    let loss: Vec<f32> = (0..70).map(|i| i as f32).collect();
    let grad = vec![Vec2::new(0.5, -0.5); 70];
    let signal = ImportanceSignal {
        loss_per_ray: &loss,
        coordinate_grad: Some(&grad),
    };
    let second = loader.fetch_importance(Some(&signal), &mut rng).unwrap();
    assert_eq!(second.len(), 70);
    assert_ne!(second.points_2d, first.points_2d);

    let short = ImportanceSignal {
        loss_per_ray: &loss[..10],
        coordinate_grad: None,
    };
    assert!(matches!(
        loader.fetch_importance(Some(&short), &mut rng),
        Err(TrainError::ShapeMismatch(_))
    ));
}

#[test]
fn test_batches_follow_configured_sampler() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);
    let mut rng = StdRng::seed_from_u64(12);

    let mut learned = SubjectLoader::new(SubjectConfig {
        sampling_type: SamplingType::Learned,
        ..training_config(tmp.path(), 64)
    })
    .unwrap();
    assert!(matches!(
        learned.fetch(0, &mut rng),
        Err(TrainError::InvalidConfiguration(_))
    ));
    let batch = learned.next_batch(0, None, &mut rng).unwrap();
    assert_eq!(batch.len(), 70);
    assert!(batch.points_2d.is_some());
    assert!(batch.direction_jacobians.is_some());

    let mut uniform = SubjectLoader::new(training_config(tmp.path(), 64)).unwrap();
    let batch = uniform.next_batch(0, None, &mut rng).unwrap();
    assert_eq!(batch.len(), 70);
    assert!(batch.points_2d.is_none());
}

#[test]
fn test_uniform_loader_rejects_importance_fetch() {
    let tmp = TempDir::new().unwrap();
    write_subject(tmp.path(), 8);
    let mut loader = SubjectLoader::new(training_config(tmp.path(), 14)).unwrap();
    assert!(matches!(
        loader.fetch_importance(None, &mut StdRng::seed_from_u64(0)),
        Err(TrainError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_missing_subject_is_reported() {
    let tmp = TempDir::new().unwrap();
    let err = SubjectLoader::new(config(tmp.path())).err().unwrap();
    assert!(matches!(err, TrainError::Data(_)));
}
