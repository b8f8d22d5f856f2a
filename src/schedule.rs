//! Fixed-rate frame schedule generation.
//!
//! Quantizes the smoothed viseme timeline onto the output frame grid and
//! injects blink windows and vertical jitter from a counter-based generator
//! keyed by `(seed, frame index)`. The schedule is a pure function of its
//! inputs: no wall clock, no global RNG, no call-order sensitivity.

use crate::{
    core::{Fps, FrameIndex, frame_count},
    error::{VisemixError, VisemixResult},
    timeline::VisemeTimeline,
    viseme::Viseme,
};

/// Schedule knobs. Defaults match the shipped talking-head preset.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct ScheduleParams {
    pub fps: Fps,
    /// Seed for the per-frame generator; same seed, same schedule.
    pub seed: u64,
    /// Minimum time between the starts of two blink windows (seconds).
    pub blink_min_interval_secs: f64,
    /// Length of a blink window in frames.
    pub blink_duration_frames: u32,
    /// Chance that an eligible frame starts a blink window, in `[0, 1]`.
    pub blink_chance: f64,
    /// Vertical jitter bound; offsets are drawn from `[-amp, amp]`.
    pub jitter_amplitude_px: u32,
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            fps: Fps::lipsync_default(),
            seed: 0,
            blink_min_interval_secs: 3.0,
            blink_duration_frames: 2,
            blink_chance: 0.15,
            jitter_amplitude_px: 1,
        }
    }
}

impl ScheduleParams {
    pub fn validate(&self) -> VisemixResult<()> {
        if !self.blink_min_interval_secs.is_finite() || self.blink_min_interval_secs < 0.0 {
            return Err(VisemixError::validation(
                "blink_min_interval_secs must be finite and >= 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.blink_chance) {
            return Err(VisemixError::validation("blink_chance must be in [0, 1]"));
        }
        if self.blink_duration_frames == 0 {
            return Err(VisemixError::validation(
                "blink_duration_frames must be > 0",
            ));
        }
        Ok(())
    }
}

/// One output frame's worth of schedule: what to draw and how.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameRecord {
    pub index: FrameIndex,
    /// `index / fps`, seconds.
    pub timestamp: f64,
    pub viseme: Viseme,
    pub blink: bool,
    /// Vertical offset in pixels, positive is down.
    pub jitter_y: i32,
}

/// Generate the full frame schedule for `total_secs` of audio.
///
/// Frame count follows the policy in [`frame_count`]. Each frame consumes
/// exactly one value of the keyed generator: the low half drives jitter, the
/// high half drives the blink decision, so neither perturbs the other's
/// stream.
pub fn generate_schedule(
    timeline: &VisemeTimeline,
    total_secs: f64,
    params: &ScheduleParams,
) -> VisemixResult<Vec<FrameRecord>> {
    params.validate()?;
    if timeline.is_empty() {
        return Err(VisemixError::validation(
            "cannot schedule frames over an empty timeline",
        ));
    }

    let count = frame_count(total_secs, params.fps);
    let period = params.fps.frame_duration_secs();
    let blink_gap_frames = blink_gap_frames(params);

    let mut records = Vec::with_capacity(count as usize);
    let mut last_blink_start: Option<u64> = None;
    let mut blink_frames_left: u32 = 0;

    for i in 0..count {
        let timestamp = (i as f64) * period;
        let word = mix64(params.seed, i);

        let jitter_y = jitter_from(word as u32, params.jitter_amplitude_px);

        let blink = if blink_frames_left > 0 {
            blink_frames_left -= 1;
            true
        } else {
            let eligible = last_blink_start.is_none_or(|s| i - s >= blink_gap_frames);
            if eligible && unit_from((word >> 32) as u32) < params.blink_chance {
                last_blink_start = Some(i);
                blink_frames_left = params.blink_duration_frames - 1;
                true
            } else {
                false
            }
        };

        records.push(FrameRecord {
            index: FrameIndex(i),
            timestamp,
            viseme: timeline.viseme_at(timestamp),
            blink,
            jitter_y,
        });
    }

    Ok(records)
}

fn blink_gap_frames(params: &ScheduleParams) -> u64 {
    let gap = (params.blink_min_interval_secs * params.fps.as_f64()).ceil() as u64;
    // A window must at least finish before the next one may start.
    gap.max(u64::from(params.blink_duration_frames))
}

/// splitmix64 finalizer over `seed ^ counter`: a stateless keyed generator,
/// so frame `i`'s draw never depends on how many draws other frames made.
fn mix64(seed: u64, counter: u64) -> u64 {
    let mut z = seed
        .wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(counter.wrapping_mul(0xbf58_476d_1ce4_e5b9));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn jitter_from(word: u32, amplitude_px: u32) -> i32 {
    if amplitude_px == 0 {
        return 0;
    }
    let span = amplitude_px * 2 + 1;
    (word % span) as i32 - amplitude_px as i32
}

fn unit_from(word: u32) -> f64 {
    f64::from(word) / f64::from(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phoneme::stub_alignment;
    use crate::timeline::SmoothParams;

    fn smoothed_timeline(total: f64) -> VisemeTimeline {
        let events = stub_alignment(total);
        let mut t = VisemeTimeline::from_phonemes(&events, total).unwrap();
        t.smooth(&SmoothParams::default()).unwrap();
        t
    }

    #[test]
    fn schedule_is_deterministic_for_a_seed() {
        let t = smoothed_timeline(2.0);
        let params = ScheduleParams {
            seed: 42,
            ..Default::default()
        };
        let a = generate_schedule(&t, 2.0, &params).unwrap();
        let b = generate_schedule(&t, 2.0, &params).unwrap();
        assert_eq!(a, b);

        let other = generate_schedule(
            &t,
            2.0,
            &ScheduleParams {
                seed: 43,
                ..Default::default()
            },
        )
        .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn frame_count_and_indices_are_dense() {
        let t = smoothed_timeline(2.0);
        let records = generate_schedule(&t, 2.01, &ScheduleParams::default()).unwrap();
        assert_eq!(records.len(), 17); // ceil(2.01 * 8)
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.index, FrameIndex(i as u64));
            assert_eq!(r.timestamp, (i as f64) * 0.125);
        }
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let t = smoothed_timeline(2.0);
        for amp in [0u32, 1, 3] {
            let params = ScheduleParams {
                jitter_amplitude_px: amp,
                seed: 7,
                ..Default::default()
            };
            let records = generate_schedule(&t, 30.0, &params).unwrap();
            for r in &records {
                assert!(r.jitter_y.unsigned_abs() <= amp, "jitter {}", r.jitter_y);
            }
        }
    }

    #[test]
    fn blink_starts_respect_minimum_spacing() {
        let t = smoothed_timeline(2.0);
        let params = ScheduleParams {
            blink_min_interval_secs: 1.5,
            blink_chance: 0.9, // force frequent attempts
            seed: 11,
            ..Default::default()
        };
        let records = generate_schedule(&t, 60.0, &params).unwrap();

        let mut starts = Vec::new();
        let mut prev_blink = false;
        for r in &records {
            if r.blink && !prev_blink {
                starts.push(r.index.0);
            }
            prev_blink = r.blink;
        }
        assert!(starts.len() >= 2, "expected several blinks in 60s");

        let min_gap = (1.5f64 * 8.0).ceil() as u64;
        for pair in starts.windows(2) {
            assert!(
                pair[1] - pair[0] >= min_gap,
                "blink starts {} and {} too close",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn blink_windows_run_for_configured_frames() {
        let t = smoothed_timeline(2.0);
        let params = ScheduleParams {
            blink_duration_frames: 3,
            blink_chance: 1.0,
            blink_min_interval_secs: 2.0,
            seed: 1,
            ..Default::default()
        };
        let records = generate_schedule(&t, 10.0, &params).unwrap();
        // With chance 1.0 the first frame starts a window of exactly 3 frames.
        assert!(records[0].blink && records[1].blink && records[2].blink);
        assert!(!records[3].blink);
    }

    #[test]
    fn viseme_lookup_honors_boundary_tie_rule() {
        let events = vec![
            crate::phoneme::PhonemeEvent::new("P", 0.0, 0.125),
            crate::phoneme::PhonemeEvent::new("AA", 0.125, 0.5),
        ];
        let t = VisemeTimeline::from_phonemes(&events, 0.5).unwrap();
        let records = generate_schedule(&t, 0.5, &ScheduleParams::default()).unwrap();
        // Frame 1 lands exactly on the 0.125 boundary: it belongs to AA.
        assert_eq!(records[1].viseme, Viseme::Aa);
        assert_eq!(records[0].viseme, Viseme::Pbm);
    }

    #[test]
    fn zero_duration_audio_yields_empty_schedule() {
        let t = smoothed_timeline(2.0);
        let records = generate_schedule(&t, 0.0, &ScheduleParams::default()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn rejects_bad_params() {
        let t = smoothed_timeline(2.0);
        let params = ScheduleParams {
            blink_chance: 1.5,
            ..Default::default()
        };
        assert!(generate_schedule(&t, 1.0, &params).is_err());
        let params = ScheduleParams {
            blink_duration_frames: 0,
            ..Default::default()
        };
        assert!(generate_schedule(&t, 1.0, &params).is_err());
    }
}
