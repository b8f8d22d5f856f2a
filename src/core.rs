use crate::error::{VisemixError, VisemixResult};

/// Dense 0-based output frame index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Rational frames-per-second.
///
/// The system targets a fixed 8 fps output, but the rate is carried as a
/// parameter everywhere so nothing below the config surface hard-codes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> VisemixResult<Self> {
        if num == 0 {
            return Err(VisemixError::validation("Fps num must be > 0"));
        }
        if den == 0 {
            return Err(VisemixError::validation("Fps den must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// The fixed output rate for lip-sync video.
    pub fn lipsync_default() -> Self {
        Self { num: 8, den: 1 }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }
}

/// Number of output frames covering `[0, total_secs)`.
///
/// Boundary policy: one frame is emitted for every index `i` with
/// `i * period < total_secs`, which equals `ceil(total_secs * fps)` except
/// when the duration lands exactly on a frame boundary (no trailing frame is
/// added for the instant `t == total_secs`).
pub fn frame_count(total_secs: f64, fps: Fps) -> u64 {
    if total_secs <= 0.0 {
        return 0;
    }
    (total_secs * fps.as_f64()).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_rejects_zero_parts() {
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(8, 0).is_err());
        assert!(Fps::new(8, 1).is_ok());
    }

    #[test]
    fn frame_count_matches_ceil_policy() {
        let fps = Fps::lipsync_default();
        assert_eq!(frame_count(2.0, fps), 16);
        assert_eq!(frame_count(2.01, fps), 17);
        assert_eq!(frame_count(0.001, fps), 1);
        assert_eq!(frame_count(0.0, fps), 0);
        assert_eq!(frame_count(-1.0, fps), 0);
    }

    #[test]
    fn frame_duration_is_inverse_of_rate() {
        let fps = Fps::new(8, 1).unwrap();
        assert_eq!(fps.frame_duration_secs(), 0.125);
        assert_eq!(fps.frames_to_secs(16), 2.0);
    }
}
