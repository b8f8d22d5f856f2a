//! Time-aligned phoneme input and its contract checks.
//!
//! Forced alignment itself is an external collaborator; this module only
//! defines the shape its output must have and fails fast when the contract
//! is violated.

use crate::error::{VisemixError, VisemixResult};

/// One phoneme aligned to the audio timeline.
///
/// Times are seconds relative to the start of the audio. Symbols are ARPAbet
/// (stress markers allowed, stripped during mapping).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PhonemeEvent {
    pub symbol: String,
    pub start: f64,
    pub end: f64,
}

impl PhonemeEvent {
    pub fn new(symbol: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end - self.start
    }
}

/// Check the aligner output contract: non-negative finite times, positive
/// durations, sorted by start, non-overlapping.
///
/// Runs before any rendering; a violation here is never retried.
pub fn validate_events(events: &[PhonemeEvent]) -> VisemixResult<()> {
    for (i, ev) in events.iter().enumerate() {
        if !ev.start.is_finite() || !ev.end.is_finite() {
            return Err(VisemixError::validation(format!(
                "phoneme {i} ('{}') has non-finite timestamps",
                ev.symbol
            )));
        }
        if ev.start < 0.0 {
            return Err(VisemixError::validation(format!(
                "phoneme {i} ('{}') starts at {} (before audio start)",
                ev.symbol, ev.start
            )));
        }
        if ev.end <= ev.start {
            return Err(VisemixError::validation(format!(
                "phoneme {i} ('{}') has non-positive duration ({}..{})",
                ev.symbol, ev.start, ev.end
            )));
        }
    }
    for (i, pair) in events.windows(2).enumerate() {
        if pair[1].start < pair[0].start {
            return Err(VisemixError::validation(format!(
                "phonemes {i} and {} are not sorted by start time",
                i + 1
            )));
        }
        if pair[1].start < pair[0].end - TIME_EPS {
            return Err(VisemixError::validation(format!(
                "phonemes {i} ('{}') and {} ('{}') overlap ({} > {})",
                pair[0].symbol,
                i + 1,
                pair[1].symbol,
                pair[0].end,
                pair[1].start
            )));
        }
    }
    Ok(())
}

/// Tolerance for boundary comparisons on the seconds timeline.
pub(crate) const TIME_EPS: f64 = 1e-6;

/// Load a phoneme sequence from an aligner JSON dump (array of events).
pub fn events_from_json(json: &str) -> VisemixResult<Vec<PhonemeEvent>> {
    let events: Vec<PhonemeEvent> = serde_json::from_str(json)
        .map_err(|e| VisemixError::validation(format!("failed to parse phoneme JSON: {e}")))?;
    validate_events(&events)?;
    Ok(events)
}

/// Deterministic alignment stub covering ~2 seconds.
///
/// Stands in for a real forced aligner in tests and demos; exercises several
/// viseme groups. Events past `total_secs` are clipped away.
pub fn stub_alignment(total_secs: f64) -> Vec<PhonemeEvent> {
    let script: [(&str, f64, f64); 9] = [
        ("AA", 0.0, 0.25),
        ("M", 0.25, 0.45),
        ("F", 0.45, 0.65),
        ("S", 0.65, 0.85),
        ("AH", 0.85, 1.10),
        ("P", 1.10, 1.30),
        ("AA", 1.30, 1.55),
        ("M", 1.55, 1.75),
        ("SIL", 1.75, 2.00),
    ];

    script
        .iter()
        .filter(|(_, start, _)| *start < total_secs)
        .map(|&(symbol, start, end)| PhonemeEvent::new(symbol, start, end.min(total_secs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sorted_non_overlapping_events() {
        let events = vec![
            PhonemeEvent::new("P", 0.0, 0.1),
            PhonemeEvent::new("AA", 0.1, 0.4),
            PhonemeEvent::new("M", 0.5, 0.6),
        ];
        validate_events(&events).unwrap();
    }

    #[test]
    fn rejects_unsorted_events() {
        let events = vec![
            PhonemeEvent::new("AA", 0.5, 0.6),
            PhonemeEvent::new("P", 0.0, 0.1),
        ];
        assert!(validate_events(&events).is_err());
    }

    #[test]
    fn rejects_overlapping_events() {
        let events = vec![
            PhonemeEvent::new("P", 0.0, 0.3),
            PhonemeEvent::new("AA", 0.2, 0.4),
        ];
        assert!(validate_events(&events).is_err());
    }

    #[test]
    fn rejects_non_positive_durations() {
        let events = vec![PhonemeEvent::new("P", 0.2, 0.2)];
        assert!(validate_events(&events).is_err());
        let events = vec![PhonemeEvent::new("P", -0.1, 0.2)];
        assert!(validate_events(&events).is_err());
    }

    #[test]
    fn json_round_trip_validates() {
        let json = r#"[{"symbol":"P","start":0.0,"end":0.1},{"symbol":"AA","start":0.1,"end":0.4}]"#;
        let events = events_from_json(json).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].symbol, "P");

        let bad = r#"[{"symbol":"AA","start":0.5,"end":0.6},{"symbol":"P","start":0.0,"end":0.1}]"#;
        assert!(events_from_json(bad).is_err());
    }

    #[test]
    fn stub_alignment_is_sorted_and_clipped() {
        let events = stub_alignment(1.0);
        validate_events(&events).unwrap();
        assert!(events.last().unwrap().end <= 1.0 + TIME_EPS);

        let full = stub_alignment(5.0);
        validate_events(&full).unwrap();
        assert_eq!(full.len(), 9);
    }
}
