//! Viseme timeline construction and temporal smoothing.
//!
//! The timeline is stored as a boundary list: `cuts` holds N+1 monotonically
//! increasing cut points and `categories` holds N visemes. Moving one cut is a
//! single update seen consistently by both adjacent intervals, which is what
//! keeps the contiguity invariant trivial under the borrowing edits below.
//!
//! Smoothing order: merge identical neighbours, enforce the minimum duration
//! (borrowing forward, with a terminal backward borrow for the last interval),
//! stretch plosives, re-enforce the minimum, final merge.

use tracing::debug;

use crate::{
    error::{VisemixError, VisemixResult},
    phoneme::{PhonemeEvent, TIME_EPS, validate_events},
    viseme::Viseme,
};

/// Smoothing knobs.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct SmoothParams {
    /// Minimum duration any interval may have after smoothing (seconds).
    pub min_viseme_secs: f64,
    /// Extra closed-mouth hold added to plosive intervals (seconds).
    pub plosive_stretch_secs: f64,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            min_viseme_secs: 0.08,
            plosive_stretch_secs: 0.03,
        }
    }
}

impl SmoothParams {
    pub fn validate(&self) -> VisemixResult<()> {
        if !self.min_viseme_secs.is_finite() || self.min_viseme_secs < 0.0 {
            return Err(VisemixError::validation(
                "min_viseme_secs must be finite and >= 0",
            ));
        }
        if !self.plosive_stretch_secs.is_finite() || self.plosive_stretch_secs < 0.0 {
            return Err(VisemixError::validation(
                "plosive_stretch_secs must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// One contiguous viseme span, borrowed view over the timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisemeInterval {
    pub viseme: Viseme,
    pub start: f64,
    pub end: f64,
}

impl VisemeInterval {
    pub fn duration_secs(&self) -> f64 {
        self.end - self.start
    }
}

/// Contiguous, gap-free viseme schedule over `[0, total_secs]`.
#[derive(Clone, Debug, PartialEq)]
pub struct VisemeTimeline {
    cuts: Vec<f64>,
    categories: Vec<Viseme>,
}

impl VisemeTimeline {
    /// Map phonemes to visemes and lay them out over `[0, total_secs]`.
    ///
    /// Gaps between events (and before the first / after the last) are filled
    /// with [`Viseme::Rest`]; events are clipped to the audio duration.
    pub fn from_phonemes(events: &[PhonemeEvent], total_secs: f64) -> VisemixResult<Self> {
        validate_events(events)?;
        if !total_secs.is_finite() || total_secs <= 0.0 {
            return Err(VisemixError::validation(format!(
                "timeline duration must be positive, got {total_secs}"
            )));
        }

        let mut cuts = vec![0.0f64];
        let mut categories = Vec::new();
        let mut push = |cuts: &mut Vec<f64>, cats: &mut Vec<Viseme>, viseme: Viseme, end: f64| {
            cuts.push(end);
            cats.push(viseme);
        };

        let mut cursor = 0.0f64;
        for ev in events {
            let start = ev.start.min(total_secs);
            let end = ev.end.min(total_secs);
            if end - start <= TIME_EPS || end <= cursor + TIME_EPS {
                // Clipped away entirely, or swallowed by the previous event.
                continue;
            }
            if start > cursor + TIME_EPS {
                push(&mut cuts, &mut categories, Viseme::Rest, start);
            }
            push(
                &mut cuts,
                &mut categories,
                Viseme::from_arpabet(&ev.symbol),
                end,
            );
            cursor = end;
        }

        if cursor < total_secs - TIME_EPS {
            push(&mut cuts, &mut categories, Viseme::Rest, total_secs);
        } else if let Some(last) = cuts.last_mut() {
            // Snap the final cut onto the audio end to absorb float dust.
            *last = total_secs;
        }

        if categories.is_empty() {
            return Err(VisemixError::validation(
                "audio is too short to cover a single viseme interval",
            ));
        }

        Ok(Self { cuts, categories })
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn total_secs(&self) -> f64 {
        *self.cuts.last().unwrap_or(&0.0)
    }

    pub fn interval(&self, i: usize) -> VisemeInterval {
        VisemeInterval {
            viseme: self.categories[i],
            start: self.cuts[i],
            end: self.cuts[i + 1],
        }
    }

    pub fn intervals(&self) -> impl Iterator<Item = VisemeInterval> + '_ {
        (0..self.len()).map(|i| self.interval(i))
    }

    /// Viseme active at `t` (binary search over cut points).
    ///
    /// A timestamp exactly on a boundary belongs to the interval starting
    /// there. Timestamps outside the covered range clamp to the ends.
    pub fn viseme_at(&self, t: f64) -> Viseme {
        debug_assert!(!self.is_empty());
        let i = self
            .cuts
            .partition_point(|c| *c <= t)
            .saturating_sub(1)
            .min(self.len() - 1);
        self.categories[i]
    }

    /// Apply the full smoothing pass. See the module docs for ordering.
    pub fn smooth(&mut self, params: &SmoothParams) -> VisemixResult<()> {
        params.validate()?;
        self.merge_adjacent();
        self.enforce_min_duration(params.min_viseme_secs)?;
        self.stretch_plosives(params.plosive_stretch_secs);
        // The floor keeps a stretched plosive from leaving a negative donor
        // behind when the configured minimum is zero.
        self.enforce_min_duration(params.min_viseme_secs.max(TIME_EPS))?;
        self.merge_adjacent();
        debug!(intervals = self.len(), "viseme timeline smoothed");
        Ok(())
    }

    /// Collapse runs of identical adjacent categories into one interval.
    ///
    /// Idempotent; a single left-to-right pass suffices on contiguous input.
    pub fn merge_adjacent(&mut self) {
        if self.len() < 2 {
            return;
        }
        let mut cuts = Vec::with_capacity(self.cuts.len());
        let mut categories = Vec::with_capacity(self.categories.len());
        cuts.push(self.cuts[0]);
        for i in 0..self.len() {
            if categories.last() == Some(&self.categories[i])
                && let Some(last) = cuts.last_mut()
            {
                // Extend the previous interval over this one.
                *last = self.cuts[i + 1];
            } else {
                categories.push(self.categories[i]);
                cuts.push(self.cuts[i + 1]);
            }
        }
        self.cuts = cuts;
        self.categories = categories;
    }

    /// Extend every interval shorter than `min_secs` by borrowing time from
    /// its following interval, cascading forward; the final interval borrows
    /// backward from its predecessors instead.
    ///
    /// A single-interval timeline shorter than `min_secs` is left as-is (the
    /// audio simply ends first). With two or more intervals, running out of
    /// timeline to borrow is a configuration error, never a negative-duration
    /// interval.
    fn enforce_min_duration(&mut self, min_secs: f64) -> VisemixResult<()> {
        let n = self.len();
        if n < 2 || min_secs <= 0.0 {
            return Ok(());
        }

        // Forward pass: every non-final interval meets the minimum by pushing
        // its end cut. A donor squeezed below the minimum is fixed when the
        // scan reaches it, which is exactly the cascading shrink.
        for i in 0..n - 1 {
            if self.cuts[i + 1] - self.cuts[i] < min_secs - TIME_EPS {
                self.cuts[i + 1] = self.cuts[i] + min_secs;
            }
        }

        // Terminal backward pass: the final cut is pinned to the audio end,
        // so a short last interval pulls its start backward instead.
        if self.total_secs() - self.cuts[n - 1] < min_secs - TIME_EPS {
            for j in (1..n).rev() {
                let target = self.cuts[j + 1] - min_secs;
                if self.cuts[j] <= target + TIME_EPS {
                    break;
                }
                if target < -TIME_EPS {
                    return Err(self.infeasible(min_secs));
                }
                self.cuts[j] = target.max(0.0);
            }
            if self.cuts[1] - self.cuts[0] < min_secs - TIME_EPS {
                return Err(self.infeasible(min_secs));
            }
        }

        Ok(())
    }

    fn infeasible(&self, min_secs: f64) -> VisemixError {
        VisemixError::timeline(format!(
            "cannot give {} intervals a minimum duration of {min_secs}s within {}s of audio",
            self.len(),
            self.total_secs()
        ))
    }

    /// Add the closed-mouth hold to plosive intervals by pushing their end cut
    /// into the following interval. The donor may drop below the minimum or
    /// even negative here; the caller re-runs minimum enforcement right after.
    fn stretch_plosives(&mut self, stretch_secs: f64) {
        if stretch_secs <= 0.0 {
            return;
        }
        let n = self.len();
        for i in 0..n.saturating_sub(1) {
            if self.categories[i].is_plosive() {
                self.cuts[i + 1] += stretch_secs;
            }
        }
        // A plosive in final position has nothing to borrow from.
    }

    /// Verify the post-smoothing invariant: contiguous coverage of
    /// `[0, total_secs]`, positive durations, and every interval at least
    /// `min_secs` long except possibly the last.
    pub fn check_invariants(&self, min_secs: f64) -> VisemixResult<()> {
        if self.is_empty() {
            return Err(VisemixError::timeline("timeline has no intervals"));
        }
        if self.cuts[0].abs() > TIME_EPS {
            return Err(VisemixError::timeline("timeline does not start at 0"));
        }
        for i in 0..self.len() {
            let iv = self.interval(i);
            if iv.duration_secs() <= 0.0 {
                return Err(VisemixError::timeline(format!(
                    "interval {i} ({:?}) has non-positive duration {}..{}",
                    iv.viseme, iv.start, iv.end
                )));
            }
            if i + 1 < self.len() && iv.duration_secs() < min_secs - TIME_EPS {
                return Err(VisemixError::timeline(format!(
                    "interval {i} ({:?}) is {}s, below the {min_secs}s minimum",
                    iv.viseme,
                    iv.duration_secs()
                )));
            }
        }
        Ok(())
    }
}
