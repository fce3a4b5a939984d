//! Interleaved 8-bit 3-channel rasters and channel-order conversion.
//!
//! The UI and image decoders speak RGB; the restoration stage works in BGR.
//! A [`Raster`] carries its channel order so conversions are explicit and
//! lossless in both directions.

use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("pixel buffer length {actual} does not match {width}x{height}x3 = {expected}")]
    BadLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("tensor holds {actual} values, expected 3x{height}x{width} = {expected}")]
    ShortTensor {
        height: usize,
        width: usize,
        expected: usize,
        actual: usize,
    },
}

/// Order of the three colour channels inside each interleaved pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// An owned, interleaved 8-bit raster with three channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl Raster {
    /// Wrap a pixel buffer, checking its length against the dimensions.
    pub fn new(
        width: u32,
        height: u32,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self, RasterError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(RasterError::BadLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            order,
            data,
        })
    }

    /// A raster filled with a single colour given as (r, g, b).
    pub fn filled(width: u32, height: u32, order: ChannelOrder, rgb: [u8; 3]) -> Self {
        let px = order.encode(rgb);
        let data = px
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            order,
            data,
        }
    }

    pub fn from_rgb_image(img: &RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            order: ChannelOrder::Rgb,
            data: img.as_raw().clone(),
        }
    }

    /// Convert into an `RgbImage`, reordering channels if needed.
    pub fn into_rgb_image(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        let rgb = self.into_order(ChannelOrder::Rgb);
        // Length is an invariant of `Raster`, so construction cannot fail.
        RgbImage::from_raw(width, height, rgb.data).unwrap_or_else(|| RgbImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Return the raster in `order`, swapping R and B in place when it differs.
    pub fn into_order(mut self, order: ChannelOrder) -> Self {
        if self.order != order {
            swap_red_blue(&mut self.data);
            self.order = order;
        }
        self
    }

    pub fn to_order(&self, order: ChannelOrder) -> Self {
        self.clone().into_order(order)
    }

    /// Read the pixel at (x, y) as (r, g, b) regardless of storage order.
    #[inline]
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.order.decode([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Write (r, g, b) at (x, y) regardless of storage order.
    #[inline]
    pub fn put_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        let px = self.order.encode(rgb);
        self.data[i..i + 3].copy_from_slice(&px);
    }

    /// Convert to a 1x3xHxW tensor in RGB plane order, mapping each byte
    /// through `normalize`.
    pub fn to_nchw_rgb(&self, normalize: impl Fn(u8) -> f32) -> Array4<f32> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                let [r, g, b] = self.rgb_at(x as u32, y as u32);
                tensor[[0, 0, y, x]] = normalize(r);
                tensor[[0, 1, y, x]] = normalize(g);
                tensor[[0, 2, y, x]] = normalize(b);
            }
        }
        tensor
    }

    /// Build a raster from RGB planes laid out as `[1, 3, height, width]`.
    ///
    /// `denormalize` maps a model output value to the 0–255 range; results
    /// are rounded and clamped.
    pub fn from_nchw_rgb(
        planes: &[f32],
        height: usize,
        width: usize,
        order: ChannelOrder,
        denormalize: impl Fn(f32) -> f32,
    ) -> Result<Self, RasterError> {
        let plane = height * width;
        if planes.len() < plane * 3 {
            return Err(RasterError::ShortTensor {
                height,
                width,
                expected: plane * 3,
                actual: planes.len(),
            });
        }
        let to_u8 = |v: f32| denormalize(v).round().clamp(0.0, 255.0) as u8;

        let mut data = Vec::with_capacity(plane * 3);
        for idx in 0..plane {
            let rgb = [
                to_u8(planes[idx]),
                to_u8(planes[plane + idx]),
                to_u8(planes[2 * plane + idx]),
            ];
            data.extend_from_slice(&order.encode(rgb));
        }
        Raster::new(width as u32, height as u32, order, data)
    }
}

impl ChannelOrder {
    /// Map (r, g, b) into this storage order.
    #[inline]
    pub fn encode(self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        match self {
            ChannelOrder::Rgb => [r, g, b],
            ChannelOrder::Bgr => [b, g, r],
        }
    }

    /// Map a stored pixel back to (r, g, b).
    #[inline]
    pub fn decode(self, px: [u8; 3]) -> [u8; 3] {
        // Swapping the outer channels is its own inverse.
        self.encode(px)
    }
}

/// Swap the first and third channel of every interleaved pixel.
pub fn swap_red_blue(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 31) as u8, (y * 17) as u8, ((x + y) * 7) as u8])
        })
    }

    #[test]
    fn test_channel_order_roundtrip_is_exact() {
        let img = gradient(13, 7);
        let raster = Raster::from_rgb_image(&img);

        let bgr = raster.to_order(ChannelOrder::Bgr);
        assert_eq!(bgr.order(), ChannelOrder::Bgr);
        assert_ne!(bgr.as_bytes(), raster.as_bytes());

        let back = bgr.into_order(ChannelOrder::Rgb).into_rgb_image();
        assert_eq!(back, img);
    }

    #[test]
    fn test_bgr_storage_layout() {
        let raster = Raster::filled(1, 1, ChannelOrder::Bgr, [10, 20, 30]);
        assert_eq!(raster.as_bytes(), &[30, 20, 10]);
        assert_eq!(raster.rgb_at(0, 0), [10, 20, 30]);
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let err = Raster::new(2, 2, ChannelOrder::Rgb, vec![0; 11]).unwrap_err();
        assert!(matches!(err, RasterError::BadLength { expected: 12, actual: 11, .. }));
    }

    #[test]
    fn test_put_rgb_respects_order() {
        let mut raster = Raster::filled(2, 1, ChannelOrder::Bgr, [0, 0, 0]);
        raster.put_rgb(1, 0, [1, 2, 3]);
        assert_eq!(raster.as_bytes(), &[0, 0, 0, 3, 2, 1]);
    }

    #[test]
    fn test_nchw_planes_are_rgb_for_bgr_raster() {
        let raster = Raster::filled(2, 2, ChannelOrder::Bgr, [255, 0, 51]);
        let tensor = raster.to_nchw_rgb(|v| f32::from(v) / 255.0);
        assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
        assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 1, 1]].abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_nchw_roundtrip() {
        let raster = Raster::from_rgb_image(&gradient(5, 4)).into_order(ChannelOrder::Bgr);
        let tensor = raster.to_nchw_rgb(|v| f32::from(v) / 255.0);
        let planes = tensor.as_standard_layout().iter().copied().collect::<Vec<_>>();
        let back = Raster::from_nchw_rgb(&planes, 4, 5, ChannelOrder::Bgr, |v| v * 255.0).unwrap();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_from_nchw_clamps() {
        let planes = [2.0f32, -1.0, 0.5];
        let raster = Raster::from_nchw_rgb(&planes, 1, 1, ChannelOrder::Rgb, |v| v * 255.0).unwrap();
        assert_eq!(raster.as_bytes(), &[255, 0, 128]);
    }
}
