//! Sprite asset loading and validation.
//!
//! A sprite set is loaded once, validated up front (required base entry,
//! equal resolution across every entry), and then shared read-only by all
//! frame renders. Pixels are premultiplied RGBA8 from the moment of decode.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use anyhow::Context as _;

use crate::{
    error::{VisemixError, VisemixResult},
    viseme::Viseme,
};

/// File stems tried for the base (neutral face) sprite, in order.
const BASE_CANDIDATES: [&str; 3] = ["REST", "base", "neutral"];

/// One decoded sprite: premultiplied RGBA8, row-major, tightly packed.
#[derive(Clone, Debug)]
pub struct SpriteImage {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
}

/// Decode an image buffer into a premultiplied sprite.
pub fn decode_sprite(bytes: &[u8]) -> VisemixResult<SpriteImage> {
    let dyn_img = image::load_from_memory(bytes).context("decode sprite from memory")?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);

    Ok(SpriteImage {
        width,
        height,
        rgba8_premul: Arc::new(rgba8_premul),
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

/// The full set of face sprites for one character.
///
/// The base sprite defines the canonical frame resolution; the Rest viseme is
/// the base face itself and never has a separate overlay.
#[derive(Clone, Debug)]
pub struct SpriteSet {
    base: SpriteImage,
    blink: Option<SpriteImage>,
    overlays: BTreeMap<Viseme, SpriteImage>,
}

impl SpriteSet {
    /// Assemble and validate a sprite set from already-decoded images.
    ///
    /// Fails fast when any entry's resolution differs from the base; this is
    /// an input-contract violation, checked before any rendering begins.
    pub fn new(
        base: SpriteImage,
        blink: Option<SpriteImage>,
        overlays: BTreeMap<Viseme, SpriteImage>,
    ) -> VisemixResult<Self> {
        if base.width == 0 || base.height == 0 {
            return Err(VisemixError::validation("base sprite has zero size"));
        }
        if let Some(b) = &blink {
            check_resolution("blink", b, &base)?;
        }
        for (viseme, sprite) in &overlays {
            check_resolution(viseme.sprite_name(), sprite, &base)?;
        }
        Ok(Self {
            base,
            blink,
            overlays,
        })
    }

    /// Load `<stem>.png` sprites from a directory.
    ///
    /// The base face comes from the first of `REST.png`, `base.png`,
    /// `neutral.png` that exists; `blink.png` and per-viseme overlays are
    /// optional. Missing overlays degrade to the base face at render time.
    pub fn load_dir(dir: &Path) -> VisemixResult<Self> {
        let base_path = BASE_CANDIDATES
            .iter()
            .map(|stem| dir.join(format!("{stem}.png")))
            .find(|p| p.exists())
            .ok_or_else(|| {
                VisemixError::validation(format!(
                    "no base sprite in '{}' (expected one of REST.png, base.png, neutral.png)",
                    dir.display()
                ))
            })?;
        let base = decode_sprite_file(&base_path)?;

        let blink_path = dir.join("blink.png");
        let blink = if blink_path.exists() {
            Some(decode_sprite_file(&blink_path)?)
        } else {
            None
        };

        let mut overlays = BTreeMap::new();
        for viseme in Viseme::ALL {
            if viseme == Viseme::Rest {
                continue;
            }
            let path = dir.join(format!("{}.png", viseme.sprite_name()));
            if path.exists() {
                overlays.insert(viseme, decode_sprite_file(&path)?);
            }
        }

        Self::new(base, blink, overlays)
    }

    pub fn width(&self) -> u32 {
        self.base.width
    }

    pub fn height(&self) -> u32 {
        self.base.height
    }

    pub fn base(&self) -> &SpriteImage {
        &self.base
    }

    pub fn blink(&self) -> Option<&SpriteImage> {
        self.blink.as_ref()
    }

    /// Mouth overlay for a viseme, if the set provides one.
    pub fn overlay(&self, viseme: Viseme) -> Option<&SpriteImage> {
        self.overlays.get(&viseme)
    }
}

fn decode_sprite_file(path: &Path) -> VisemixResult<SpriteImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read sprite '{}'", path.display()))?;
    decode_sprite(&bytes)
        .map_err(|e| VisemixError::validation(format!("sprite '{}': {e}", path.display())))
}

fn check_resolution(name: &str, sprite: &SpriteImage, base: &SpriteImage) -> VisemixResult<()> {
    if sprite.width != base.width || sprite.height != base.height {
        return Err(VisemixError::validation(format!(
            "sprite '{name}' is {}x{}, expected {}x{} to match the base sprite",
            sprite.width, sprite.height, base.width, base.height
        )));
    }
    Ok(())
}
