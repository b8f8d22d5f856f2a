//! Pure per-frame sprite compositing.
//!
//! `render_frame` is side-effect free and touches only read-only shared data,
//! so the pipeline may run it concurrently across frame indices; only the
//! final write order into the encoder is sequenced.

use crate::{
    composite::{flatten_premul_to_rgb, over_in_place, shift_rows_in_place},
    error::VisemixResult,
    schedule::FrameRecord,
    sprites::SpriteSet,
};

/// One finished output frame: tightly packed rgb24.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRgb {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameRgb {
    pub fn byte_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * 3
    }
}

/// Composite one frame: base face, then the viseme overlay if the set has
/// one (otherwise base only, a designed degradation), then the blink overlay
/// when the record blinks, then the vertical jitter shift, then alpha
/// flattening against `bg_rgb`.
pub fn render_frame(
    record: &FrameRecord,
    sprites: &SpriteSet,
    bg_rgb: [u8; 3],
) -> VisemixResult<FrameRgb> {
    let width = sprites.width();
    let height = sprites.height();

    let mut scratch = sprites.base().rgba8_premul.as_ref().clone();

    if let Some(overlay) = sprites.overlay(record.viseme) {
        over_in_place(&mut scratch, &overlay.rgba8_premul)?;
    }
    if record.blink
        && let Some(blink) = sprites.blink()
    {
        over_in_place(&mut scratch, &blink.rgba8_premul)?;
    }

    shift_rows_in_place(&mut scratch, width, height, 4, record.jitter_y)?;

    let mut data = vec![0u8; FrameRgb::byte_len(width, height)];
    flatten_premul_to_rgb(&mut data, &scratch, bg_rgb)?;

    Ok(FrameRgb {
        width,
        height,
        data,
    })
}
