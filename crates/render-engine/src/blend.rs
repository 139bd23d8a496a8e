//! Cross-dissolve between two frames.

use lapse_common::{RenderError, RenderResult};

use crate::frame::FrameBuffer;

/// Write `(1 - alpha) * from + alpha * to` into `dst`.
///
/// `alpha` is clamped to `[0, 1]`; `0` reproduces `from` exactly and `1`
/// reproduces `to` exactly. Works per channel, so premultiplied input stays
/// premultiplied.
pub fn blend_into(
    dst: &mut FrameBuffer,
    from: &FrameBuffer,
    to: &FrameBuffer,
    alpha: f64,
) -> RenderResult<()> {
    if from.dimensions() != to.dimensions() || dst.dimensions() != from.dimensions() {
        return Err(RenderError::frame(format!(
            "cannot blend {:?} with {:?} into {:?}",
            from.dimensions(),
            to.dimensions(),
            dst.dimensions()
        )));
    }

    let weight = (alpha.clamp(0.0, 1.0) * 256.0).round() as u32;
    let inverse = 256 - weight;
    for ((d, a), b) in dst
        .as_bytes_mut()
        .iter_mut()
        .zip(from.as_bytes())
        .zip(to.as_bytes())
    {
        *d = ((u32::from(*a) * inverse + u32::from(*b) * weight + 128) >> 8) as u8;
    }
    Ok(())
}

/// Blend weight of morph step `step` out of `steps`. A pair with no steps
/// shows only its first image.
pub fn morph_alpha(step: u32, steps: u32) -> f64 {
    if steps == 0 {
        0.0
    } else {
        f64::from(step) / f64::from(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(width: u32, height: u32, value: u8) -> FrameBuffer {
        let mut frame = FrameBuffer::try_new(width, height).unwrap();
        frame.as_bytes_mut().fill(value);
        frame
    }

    #[test]
    fn test_endpoints_are_exact() {
        let a = filled(4, 4, 10);
        let b = filled(4, 4, 250);
        let mut out = filled(4, 4, 0);

        blend_into(&mut out, &a, &b, 0.0).unwrap();
        assert_eq!(out, a);
        blend_into(&mut out, &a, &b, 1.0).unwrap();
        assert_eq!(out, b);
    }

    #[test]
    fn test_midpoint() {
        let a = filled(2, 2, 0);
        let b = filled(2, 2, 200);
        let mut out = filled(2, 2, 0);
        blend_into(&mut out, &a, &b, 0.5).unwrap();
        assert!(out.as_bytes().iter().all(|&v| v == 100));
    }

    #[test]
    fn test_size_mismatch_is_frame_error() {
        let a = filled(2, 2, 0);
        let b = filled(4, 2, 0);
        let mut out = filled(2, 2, 0);
        let err = blend_into(&mut out, &a, &b, 0.5).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_morph_alpha() {
        assert_eq!(morph_alpha(0, 5), 0.0);
        assert_eq!(morph_alpha(5, 5), 1.0);
        assert_eq!(morph_alpha(0, 0), 0.0);
    }
}
