//! Phoneme-to-viseme mapping.
//!
//! The closed viseme set collapses the ARPAbet consonant/vowel inventory into
//! roughly a dozen visually distinct mouth shapes. Unknown symbols map to
//! [`Viseme::Rest`] on purpose: a forced aligner that emits an unexpected
//! symbol should degrade to a neutral mouth, not abort the render.

/// Visual mouth-shape category.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Viseme {
    /// Neutral / closed mouth; also the fallback for unknown symbols.
    Rest,
    /// Bilabial closure (P, B, M).
    Pbm,
    /// Labiodental (F, V).
    Fv,
    /// Dental (TH, DH).
    Th,
    /// Alveolar fricative (S, Z).
    Sz,
    /// Affricate (CH, JH).
    Chj,
    /// Velar (K, G, NG).
    Kng,
    /// Palatal glide (Y).
    Y,
    /// Rounded vowels and W (UW, UH, OW, W).
    Uw,
    /// Wide open vowels (AA, AE, AH, AO).
    Aa,
    /// Front vowels (IY, IH, EY, EH).
    Iy,
    /// R-colored vowels (ER, R).
    Er,
    /// Lateral (L).
    L,
}

impl Viseme {
    /// Every category, in sprite-lookup order.
    pub const ALL: [Viseme; 13] = [
        Viseme::Rest,
        Viseme::Pbm,
        Viseme::Fv,
        Viseme::Th,
        Viseme::Sz,
        Viseme::Chj,
        Viseme::Kng,
        Viseme::Y,
        Viseme::Uw,
        Viseme::Aa,
        Viseme::Iy,
        Viseme::Er,
        Viseme::L,
    ];

    /// Map an ARPAbet symbol to its viseme.
    ///
    /// Total over all input: stress digits (`AH0`, `IY1`, ...) are stripped,
    /// case is ignored, and anything outside the known set maps to
    /// [`Viseme::Rest`].
    pub fn from_arpabet(symbol: &str) -> Viseme {
        match normalize_arpabet(symbol).as_str() {
            "P" | "B" | "M" => Viseme::Pbm,
            "F" | "V" => Viseme::Fv,
            "TH" | "DH" => Viseme::Th,
            "S" | "Z" => Viseme::Sz,
            "CH" | "JH" => Viseme::Chj,
            "K" | "G" | "NG" => Viseme::Kng,
            "Y" => Viseme::Y,
            "UW" | "UH" | "OW" | "W" => Viseme::Uw,
            "AA" | "AE" | "AH" | "AO" => Viseme::Aa,
            "IY" | "IH" | "EY" | "EH" => Viseme::Iy,
            "ER" | "R" => Viseme::Er,
            "L" => Viseme::L,
            // HH, SIL, and anything unrecognized.
            _ => Viseme::Rest,
        }
    }

    /// Sprite file stem for this category (`<name>.png` in a sprite dir).
    pub fn sprite_name(self) -> &'static str {
        match self {
            Viseme::Rest => "REST",
            Viseme::Pbm => "PBM",
            Viseme::Fv => "FV",
            Viseme::Th => "TH",
            Viseme::Sz => "SZ",
            Viseme::Chj => "CHJ",
            Viseme::Kng => "KNG",
            Viseme::Y => "Y",
            Viseme::Uw => "UW",
            Viseme::Aa => "AA",
            Viseme::Iy => "IY",
            Viseme::Er => "ER",
            Viseme::L => "L",
        }
    }

    /// Categories that get the closed-mouth hold stretch during smoothing.
    pub fn is_plosive(self) -> bool {
        matches!(self, Viseme::Pbm)
    }
}

/// Uppercase and strip a trailing ARPAbet stress marker (0/1/2).
pub fn normalize_arpabet(symbol: &str) -> String {
    let mut s = symbol.trim().to_ascii_uppercase();
    if s.ends_with(['0', '1', '2']) {
        s.pop();
    }
    s
}
