// src/detector.rs
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use log::{debug, info};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};

use crate::landmarks::{LandmarkSet, Point, LANDMARK_COUNT};

/// Side length of the square model input.
pub const MODEL_INPUT_SIZE: u32 = 224;

/// Finds at most one hand in a frame.
pub trait HandDetector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>>;
}

/// Centered square region of the frame that is fed to the model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub side: u32,
}

impl CropRegion {
    pub fn centered(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            side,
        }
    }

    /// Maps a point in model input pixels back to frame pixels.
    pub fn to_frame(&self, model_x: f32, model_y: f32) -> Point {
        let scale = self.side as f32 / MODEL_INPUT_SIZE as f32;
        Point::new(self.x as f32 + model_x * scale, self.y as f32 + model_y * scale)
    }
}

/// Converts the flat `x, y, z` landmark output into frame coordinates.
pub fn landmarks_from_output(values: &[f32], crop: CropRegion) -> Result<LandmarkSet> {
    if values.len() < LANDMARK_COUNT * 3 {
        return Err(anyhow!(
            "Landmark output has {} values, expected {}",
            values.len(),
            LANDMARK_COUNT * 3
        ));
    }
    let points: Vec<Point> = values
        .chunks_exact(3)
        .take(LANDMARK_COUNT)
        .map(|xyz| crop.to_frame(xyz[0], xyz[1]))
        .collect();
    LandmarkSet::try_from(points.as_slice())
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// MediaPipe-style hand landmark model run through ONNX Runtime.
///
/// Expects an NHWC `[1, 224, 224, 3]` float input in `0..1`. The first output
/// holds 21 `x, y, z` triples in input pixels, the second the hand presence
/// logit.
pub struct HandLandmarkModel {
    session: Session,
    input_name: String,
    landmarks_output: String,
    presence_output: String,
    presence_threshold: f32,
}

impl HandLandmarkModel {
    pub fn new(model_path: &Path, presence_threshold: f32) -> Result<Self> {
        info!("Loading hand landmark model from {}", model_path.display());
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model: {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("Model has no inputs"))?;
        if session.outputs.len() < 2 {
            return Err(anyhow!(
                "Model has {} outputs, expected landmarks and presence",
                session.outputs.len()
            ));
        }
        let landmarks_output = session.outputs[0].name.clone();
        let presence_output = session.outputs[1].name.clone();
        info!(
            "Hand landmark model ready (input: {}, outputs: {}, {})",
            input_name, landmarks_output, presence_output
        );

        Ok(Self {
            session,
            input_name,
            landmarks_output,
            presence_output,
            presence_threshold,
        })
    }

    fn preprocess(frame: &RgbImage, crop: CropRegion) -> Array4<f32> {
        let cropped = imageops::crop_imm(frame, crop.x, crop.y, crop.side, crop.side).to_image();
        let resized = imageops::resize(
            &cropped,
            MODEL_INPUT_SIZE,
            MODEL_INPUT_SIZE,
            imageops::FilterType::Triangle,
        );
        let size = MODEL_INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, size, size, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
            }
        }
        input
    }
}

impl HandDetector for HandLandmarkModel {
    fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let crop = CropRegion::centered(width, height);
        let input = Self::preprocess(frame, crop);

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;

        let presence = outputs[self.presence_output.as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .next()
            .copied()
            .map(sigmoid)
            .unwrap_or(0.0);
        if presence < self.presence_threshold {
            debug!("Hand presence {:.2} below threshold.", presence);
            return Ok(None);
        }

        let values: Vec<f32> = outputs[self.landmarks_output.as_str()]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();
        landmarks_from_output(&values, crop).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_crop() {
        assert_eq!(
            CropRegion::centered(640, 480),
            CropRegion { x: 80, y: 0, side: 480 }
        );
        assert_eq!(
            CropRegion::centered(480, 640),
            CropRegion { x: 0, y: 80, side: 480 }
        );
        assert_eq!(
            CropRegion::centered(224, 224),
            CropRegion { x: 0, y: 0, side: 224 }
        );
    }

    #[test]
    fn test_to_frame_scales_and_offsets() {
        let crop = CropRegion::centered(1120, 448);
        // side 448 => scale 2, x offset 336
        assert_eq!(crop.to_frame(0.0, 0.0), Point::new(336.0, 0.0));
        assert_eq!(crop.to_frame(112.0, 224.0), Point::new(560.0, 448.0));
    }

    #[test]
    fn test_landmarks_from_output() {
        let crop = CropRegion::centered(224, 224);
        let values: Vec<f32> = (0..LANDMARK_COUNT)
            .flat_map(|i| [i as f32, 2.0 * i as f32, 0.5])
            .collect();
        let hand = landmarks_from_output(&values, crop).unwrap();
        assert_eq!(hand.get(0), Point::new(0.0, 0.0));
        assert_eq!(hand.get(20), Point::new(20.0, 40.0));
    }

    #[test]
    fn test_short_output_rejected() {
        let crop = CropRegion::centered(224, 224);
        assert!(landmarks_from_output(&[0.0; 60], crop).is_err());
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 51]));
        let input = HandLandmarkModel::preprocess(&frame, CropRegion::centered(320, 240));
        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        assert!((input[[0, 10, 10, 0]] - 1.0).abs() < 0.01);
        assert!(input[[0, 10, 10, 1]].abs() < 0.01);
        assert!((input[[0, 100, 100, 2]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
    }
}
