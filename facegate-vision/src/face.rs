use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::Array1;

/// Reference eye positions for a 112x112 aligned crop (ArcFace standard)
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);
const REF_SIZE: f32 = 112.0;

/// Eyes closer than this (in source pixels) cannot define a rotation.
const MIN_EYE_DISTANCE: f32 = 1.0;

/// Face detection handed over by the external detector
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub left_eye: Option<[f32; 2]>,
    pub right_eye: Option<[f32; 2]>,
}

impl Detection {
    pub fn new(bbox: [f32; 4], score: f32) -> Self {
        Self {
            bbox,
            score,
            left_eye: None,
            right_eye: None,
        }
    }

    pub fn with_eyes(mut self, left: [f32; 2], right: [f32; 2]) -> Self {
        self.left_eye = Some(left);
        self.right_eye = Some(right);
        self
    }
}

/// Face embedding vector.
///
/// Vectors coming out of the embedding model are not guaranteed to be unit
/// length; call [`Embedding::normalize`] before comparing them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn norm(&self) -> f32 {
        self.vector.dot(&self.vector).sqrt()
    }

    /// L2-normalize in place. A vector whose norm is not positive is left
    /// untouched and stays degenerate, and one already at unit length (to
    /// within rounding) keeps its exact components.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if !(norm > 0.0) || (norm - 1.0).abs() <= f32::EPSILON * self.dim() as f32 {
            return;
        }
        self.vector.mapv_inplace(|x| x / norm);
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Zero (or NaN) vectors never match anything.
    pub fn is_degenerate(&self) -> bool {
        self.vector.is_empty() || !(self.norm() > 0.0)
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }
}

/// Euclidean distance between two embeddings, `None` when the dimensions
/// differ.
pub fn distance(a: &Embedding, b: &Embedding) -> Option<f32> {
    if a.dim() != b.dim() {
        return None;
    }

    let sum: f32 = a
        .vector
        .iter()
        .zip(b.vector.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    Some(sum.sqrt())
}

/// Align and crop a face.
///
/// With both eye landmarks the crop is rotated so the eye line is level and
/// scaled so the eyes land on the reference positions. Without them the
/// bounding box is cropped and resized.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    match (detection.left_eye, detection.right_eye) {
        (Some(left), Some(right)) => {
            let dx = right[0] - left[0];
            let dy = right[1] - left[1];
            if (dx * dx + dy * dy).sqrt() < MIN_EYE_DISTANCE {
                log::debug!("eye landmarks collapsed, falling back to bbox crop");
                return crop_bbox(img, &detection.bbox, size);
            }
            Ok(align_by_eyes(img, (left[0], left[1]), (right[0], right[1]), size))
        }
        _ => crop_bbox(img, &detection.bbox, size),
    }
}

fn crop_bbox(img: &DynamicImage, bbox: &[f32; 4], size: u32) -> Result<DynamicImage> {
    let (img_w, img_h) = img.dimensions();

    let x0 = bbox[0].max(0.0).min(img_w as f32);
    let y0 = bbox[1].max(0.0).min(img_h as f32);
    let x1 = (bbox[0] + bbox[2]).max(0.0).min(img_w as f32);
    let y1 = (bbox[1] + bbox[3]).max(0.0).min(img_h as f32);

    let width = (x1 - x0) as u32;
    let height = (y1 - y0) as u32;
    if width == 0 || height == 0 {
        anyhow::bail!("bounding box {:?} lies outside the {}x{} frame", bbox, img_w, img_h);
    }

    let cropped = img.crop_imm(x0 as u32, y0 as u32, width, height);
    Ok(cropped.resize_exact(size, size, image::imageops::FilterType::Triangle))
}

fn align_by_eyes(
    img: &DynamicImage,
    left_eye: (f32, f32),
    right_eye: (f32, f32),
    size: u32,
) -> DynamicImage {
    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let eye_angle = eye_dy.atan2(eye_dx);

    let ref_eye_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let actual_eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();

    let scale = (size as f32 / REF_SIZE) * (ref_eye_dist / actual_eye_dist);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * size as f32 / REF_SIZE,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * size as f32 / REF_SIZE,
    );

    // output = [a b; c d] * input + [tx, ty]
    let a = scale * eye_angle.cos();
    let b = scale * eye_angle.sin();
    let c = -b;
    let d = a;
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let (img_w, img_h) = img.dimensions();
    let mut output = image::RgbImage::new(size, size);

    for out_y in 0..size {
        for out_x in 0..size {
            let tmp_x = out_x as f32 - tx;
            let tmp_y = out_y as f32 - ty;
            let in_x = (d * tmp_x - b * tmp_y) / det;
            let in_y = (-c * tmp_x + a * tmp_y) / det;

            if in_x < 0.0 || in_x >= img_w as f32 || in_y < 0.0 || in_y >= img_h as f32 {
                continue; // outside the frame stays black
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut rgb = [0u8; 3];
            for (ch, out) in rgb.iter_mut().enumerate() {
                *out = (p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(rgb));
        }
    }

    DynamicImage::ImageRgb8(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit_length() {
        let emb = Embedding::from_vec(vec![3.0, 4.0]).normalized();
        assert!((emb.norm() - 1.0).abs() < 1e-6);
        assert!((emb.vector[0] - 0.6).abs() < 1e-6);
        assert!((emb.vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let values: Vec<f32> = (0..128).map(|i| ((i * 37 % 101) as f32 - 50.0) / 7.0).collect();
        let once = Embedding::from_vec(values).normalized();
        let twice = once.clone().normalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_zero_vector_stays_zero() {
        let emb = Embedding::from_vec(vec![0.0; 4]).normalized();
        assert!(emb.vector.iter().all(|&x| x == 0.0));
        assert!(emb.is_degenerate());
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let b = Embedding::from_vec(vec![1.0, 0.0, 0.0]);
        assert_eq!(distance(&a, &b), None);
    }

    #[test]
    fn test_distance_orthogonal_units() {
        let a = Embedding::from_vec(vec![1.0, 0.0]);
        let b = Embedding::from_vec(vec![0.0, 1.0]);
        let d = distance(&a, &b).unwrap();
        assert!((d - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_crop_bbox_outside_frame() {
        let img = DynamicImage::new_rgb8(32, 32);
        let det = Detection::new([100.0, 100.0, 10.0, 10.0], 0.9);
        assert!(align_face(&img, &det, 16).is_err());
    }
}
