//! Colour lookups at integer and fractional pixel coordinates.

use glam::Vec3;
use image::RgbImage;

fn texel(image: &RgbImage, x: u32, y: u32) -> Vec3 {
    let [r, g, b] = image.get_pixel(x, y).0;
    Vec3::new(r as f32, g as f32, b as f32) / 255.0
}

/// Bilinearly interpolated RGB in `[0, 1]`, clamped to the image border.
pub fn sample_rgb(image: &RgbImage, x: f32, y: f32) -> Vec3 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Vec3::ZERO;
    }
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let tx = x - x0 as f32;
    let ty = y - y0 as f32;

    let top = texel(image, x0, y0).lerp(texel(image, x1, y0), tx);
    let bottom = texel(image, x0, y1).lerp(texel(image, x1, y1), tx);
    top.lerp(bottom, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient() -> RgbImage {
        RgbImage::from_fn(3, 2, |x, y| Rgb([(x * 100) as u8, (y * 200) as u8, 51]))
    }

    #[test]
    fn test_integer_coordinates_are_exact() {
        let img = gradient();
        for y in 0..2 {
            for x in 0..3 {
                let expected = texel(&img, x, y);
                assert_eq!(sample_rgb(&img, x as f32, y as f32), expected);
            }
        }
    }

    #[test]
    fn test_fractional_coordinates_interpolate() {
        let img = gradient();
        let c = sample_rgb(&img, 0.5, 0.5);
        assert!(c.abs_diff_eq(Vec3::new(50.0, 100.0, 51.0) / 255.0, 1e-6));
    }

    #[test]
    fn test_out_of_range_clamps_to_border() {
        let img = gradient();
        assert_eq!(sample_rgb(&img, 10.0, -3.0), texel(&img, 2, 0));
    }
}
