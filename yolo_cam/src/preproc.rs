//! Conversion of camera frames into model input tensors.
//!
use image::RgbImage;
use tract_onnx::prelude::*;

/// Resizes frames to a square and lays them out as normalized `[1, 3, size, size]` tensors.
#[derive(Clone, Copy, Debug)]
pub struct Preprocessor {
    size: u32,
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Build the input tensor for one frame.
    ///
    /// The frame is resized without keeping its aspect ratio, so detections are scaled back per
    /// axis.
    pub fn to_tensor(&self, frame: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            frame,
            self.size,
            self.size,
            image::imageops::FilterType::Triangle,
        );

        let size = self.size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized[(x as _, y as _)][c] as f32 / 255.0
        })
        .into()
    }
}

#[cfg(test)]
mod test {

    use image::Rgb;

    use super::*;

    #[test]
    fn tensor_has_batch_and_channel_first_layout() -> TractResult<()> {
        let frame = RgbImage::from_pixel(64, 48, Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(32).to_tensor(&frame);

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);

        let view = tensor.to_array_view::<f32>()?;
        assert!(view.index_axis(tract_ndarray::Axis(1), 0).iter().all(|&v| v == 1.0));
        assert!(view.index_axis(tract_ndarray::Axis(1), 1).iter().all(|&v| v == 0.0));
        assert!(view
            .index_axis(tract_ndarray::Axis(1), 2)
            .iter()
            .all(|&v| (v - 0.2).abs() < 1e-6));

        Ok(())
    }

    #[test]
    fn pixel_positions_are_kept() -> TractResult<()> {
        let mut frame = RgbImage::new(2, 2);
        frame.put_pixel(1, 0, Rgb([255, 255, 255]));
        let tensor = Preprocessor::new(2).to_tensor(&frame);

        let view = tensor.to_array_view::<f32>()?;
        assert_eq!(view[[0, 0, 0, 1]], 1.0);
        assert_eq!(view[[0, 2, 0, 1]], 1.0);
        assert_eq!(view[[0, 0, 1, 0]], 0.0);
        assert_eq!(view[[0, 1, 0, 0]], 0.0);

        Ok(())
    }

    #[test]
    fn values_are_normalized() -> TractResult<()> {
        let frame = RgbImage::from_fn(50, 30, |x, y| Rgb([(x * 5) as u8, (y * 8) as u8, 128]));
        let tensor = Preprocessor::new(16).to_tensor(&frame);

        let view = tensor.to_array_view::<f32>()?;
        assert!(view.iter().all(|v| (0.0..=1.0).contains(v)));

        Ok(())
    }
}
