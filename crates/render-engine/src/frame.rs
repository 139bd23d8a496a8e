//! Frame buffers and working-resolution math.
//!
//! Frames are 32 bpp BGRA with premultiplied alpha, stored row-major with
//! no padding. The byte order matches what the encoder reads from its pipe.

use image::imageops::FilterType;
use image::DynamicImage;
use lapse_common::{RenderError, RenderResult};

pub const BYTES_PER_PIXEL: usize = 4;

/// Pixel dimensions frames are rendered at.
///
/// The first photo is scaled down (never up) so that neither side exceeds
/// `max_dimension` and the result fits inside `preset`. Both sides are
/// rounded down to even numbers, as yuv420p output requires.
pub fn working_resolution(
    source_width: u32,
    source_height: u32,
    max_dimension: u32,
    preset: (u32, u32),
) -> (u32, u32) {
    let w = u64::from(source_width.max(1));
    let h = u64::from(source_height.max(1));
    let max = u64::from(max_dimension.max(2));

    // Scale factors as exact fractions; the smallest one wins.
    let (num, den) = [
        (max, w),
        (max, h),
        (u64::from(preset.0.max(2)), w),
        (u64::from(preset.1.max(2)), h),
        (1, 1),
    ]
    .into_iter()
    .fold((1, 1), |(bn, bd), (n, d)| {
        if u128::from(n) * u128::from(bd) < u128::from(bn) * u128::from(d) {
            (n, d)
        } else {
            (bn, bd)
        }
    });

    (even_floor(w * num / den), even_floor(h * num / den))
}

fn even_floor(value: u64) -> u32 {
    (value.min(u64::from(u32::MAX)) as u32 & !1).max(2)
}

/// Bytes needed for a frame, or `None` on overflow.
pub fn frame_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(BYTES_PER_PIXEL)
}

/// One BGRA premultiplied frame.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a zeroed frame, reporting allocation failure instead of aborting.
    pub fn try_new(width: u32, height: u32) -> RenderResult<Self> {
        let len = frame_len(width, height)
            .ok_or_else(|| RenderError::memory(format!("frame {width}x{height} is too large")))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            RenderError::memory(format!("cannot allocate {len} bytes for a {width}x{height} frame: {e}"))
        })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// BGRA value at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(i..i + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Scale `image` to cover this frame (cropping the overflow) and store it.
    pub fn fill_from_image(&mut self, image: &DynamicImage) {
        let rgba = if image.width() == self.width && image.height() == self.height {
            image.to_rgba8()
        } else {
            image
                .resize_to_fill(self.width, self.height, FilterType::Triangle)
                .to_rgba8()
        };

        for (dst, src) in self
            .data
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(rgba.as_raw().chunks_exact(BYTES_PER_PIXEL))
        {
            let a = src[3];
            dst[0] = premultiply(src[2], a);
            dst[1] = premultiply(src[1], a);
            dst[2] = premultiply(src[0], a);
            dst[3] = a;
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    if alpha == 255 {
        return channel;
    }
    ((u32::from(channel) * u32::from(alpha) + 127) / 255) as u8
}
