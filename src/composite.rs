//! CPU compositing primitives for sprite frames.
//!
//! All layer math happens in premultiplied RGBA8; alpha is flattened against
//! an opaque background only at the very end, because the encoder input
//! format (rgb24) carries no alpha.

use crate::error::{VisemixError, VisemixResult};

pub type PremulRgba8 = [u8; 4];

/// Source-over for premultiplied pixels.
pub fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    let sa = u16::from(src[3]);
    if sa == 0 {
        return dst;
    }
    if sa == 255 {
        return src;
    }

    let inv = 255u16 - sa;
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = (u16::from(src[i]) + mul_div255(u16::from(dst[i]), inv)).min(255) as u8;
    }
    out
}

/// Source-over an entire layer onto `dst` in place.
pub fn over_in_place(dst: &mut [u8], src: &[u8]) -> VisemixResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(VisemixError::render(
            "over_in_place expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&out);
    }
    Ok(())
}

/// Translate an image vertically by `dy` pixels in place (positive is down).
///
/// Rows shifted in from the edge replicate the nearest original edge row
/// (clamp), never wrap.
pub fn shift_rows_in_place(
    data: &mut [u8],
    width: u32,
    height: u32,
    bytes_per_px: usize,
    dy: i32,
) -> VisemixResult<()> {
    let stride = width as usize * bytes_per_px;
    if data.len() != stride * height as usize {
        return Err(VisemixError::render(
            "shift_rows_in_place buffer does not match width*height",
        ));
    }
    if dy == 0 || height == 0 {
        return Ok(());
    }

    let h = height as i64;
    let dy = i64::from(dy);
    let src_row = |r: i64| ((r - dy).clamp(0, h - 1)) as usize;

    if dy > 0 {
        // Shift down: walk bottom-up so every source row is still unwritten.
        for r in (0..h).rev() {
            let s = src_row(r);
            let r = r as usize;
            if s != r {
                data.copy_within(s * stride..(s + 1) * stride, r * stride);
            }
        }
    } else {
        // Shift up: walk top-down.
        for r in 0..h {
            let s = src_row(r);
            let r = r as usize;
            if s != r {
                data.copy_within(s * stride..(s + 1) * stride, r * stride);
            }
        }
    }
    Ok(())
}

/// Flatten premultiplied RGBA8 over an opaque background into tight rgb24.
pub fn flatten_premul_to_rgb(
    dst_rgb: &mut [u8],
    src_premul: &[u8],
    bg_rgb: [u8; 3],
) -> VisemixResult<()> {
    if !src_premul.len().is_multiple_of(4) || dst_rgb.len() * 4 != src_premul.len() * 3 {
        return Err(VisemixError::render(
            "flatten_premul_to_rgb expects rgb24 dst matching rgba8 src",
        ));
    }

    let bg = [u16::from(bg_rgb[0]), u16::from(bg_rgb[1]), u16::from(bg_rgb[2])];
    for (d, s) in dst_rgb.chunks_exact_mut(3).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(&s[..3]);
            continue;
        }
        let inv = 255u16 - a;
        for i in 0..3 {
            d[i] = (u16::from(s[i]) + mul_div255(bg[i], inv)).min(255) as u8;
        }
    }
    Ok(())
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
