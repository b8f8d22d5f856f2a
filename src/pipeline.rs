//! End-to-end orchestration: phonemes + audio + sprites in, MP4 out.
//!
//! Stages run strictly in order (timeline, schedule, render+mux) but the
//! render stage itself is chunk-parallel: a chunk of frames is composited
//! across the rayon pool while the previous chunk streams to the encoder in
//! index order. Determinism holds because every frame render is a pure
//! function of its schedule record.

use std::path::Path;

use rayon::prelude::*;
use tracing::info;

use crate::{
    audio::AudioBuffer,
    core::{FrameIndex, frame_count},
    error::VisemixResult,
    mux::{FfmpegMuxer, MuxConfig},
    phoneme::PhonemeEvent,
    render::{FrameRgb, render_frame},
    schedule::{FrameRecord, ScheduleParams, generate_schedule},
    sprites::SpriteSet,
    timeline::{SmoothParams, VisemeTimeline},
};

/// Frames composited per parallel batch before being streamed out.
const RENDER_CHUNK: usize = 16;

#[derive(Clone, Debug)]
pub struct PipelineOpts {
    pub smooth: SmoothParams,
    pub schedule: ScheduleParams,
    /// Opaque background the final frames are flattened against.
    pub bg_rgb: [u8; 3],
    pub overwrite: bool,
    /// Encoder binary; see [`MuxConfig::encoder_program`].
    pub encoder_program: String,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            smooth: SmoothParams::default(),
            schedule: ScheduleParams::default(),
            bg_rgb: [255, 255, 255],
            overwrite: true,
            encoder_program: "ffmpeg".to_string(),
        }
    }
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub frames: u64,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

/// Run the whole pipeline and write an H.264+AAC MP4 to `out_path`.
///
/// The audio buffer is the duration authority: the video track covers exactly
/// `audio.duration_secs()` at the configured frame rate, and the encoder's
/// `-shortest` keeps the mux aligned to it.
pub fn render_to_mp4(
    events: &[PhonemeEvent],
    audio: &AudioBuffer,
    sprites: &SpriteSet,
    out_path: &Path,
    opts: &PipelineOpts,
) -> VisemixResult<PipelineReport> {
    let total_secs = audio.duration_secs();
    info!(
        duration_secs = total_secs,
        events = events.len(),
        out = %out_path.display(),
        "pipeline start"
    );

    let mut timeline = VisemeTimeline::from_phonemes(events, total_secs)?;
    timeline.smooth(&opts.smooth)?;
    info!(intervals = timeline.len(), "viseme timeline smoothed");

    let records = generate_schedule(&timeline, total_secs, &opts.schedule)?;
    debug_assert_eq!(records.len() as u64, frame_count(total_secs, opts.schedule.fps));
    info!(frames = records.len(), "frame schedule generated");

    let frames = records.len() as u64;
    let pcm = audio.to_s16le();

    let mut cfg = MuxConfig::new(
        sprites.width(),
        sprites.height(),
        opts.schedule.fps,
        audio.sample_rate(),
        out_path,
    );
    cfg.overwrite = opts.overwrite;
    cfg.encoder_program = opts.encoder_program.clone();

    let mut muxer = FfmpegMuxer::launch(cfg)?;
    muxer.stream(rendered_frames(records, sprites, opts.bg_rgb), &pcm)?;

    info!(frames, "pipeline complete");
    Ok(PipelineReport {
        frames,
        duration_secs: total_secs,
        width: sprites.width(),
        height: sprites.height(),
    })
}

/// Lazily render the schedule in parallel chunks, preserving index order.
///
/// Only one chunk of frames is resident at a time, so memory stays bounded by
/// `RENDER_CHUNK * frame_bytes` regardless of clip length.
pub(crate) fn rendered_frames(
    records: Vec<FrameRecord>,
    sprites: &SpriteSet,
    bg_rgb: [u8; 3],
) -> impl Iterator<Item = VisemixResult<(FrameIndex, FrameRgb)>> + Send + '_ {
    let chunks: Vec<Vec<FrameRecord>> = records
        .chunks(RENDER_CHUNK)
        .map(<[FrameRecord]>::to_vec)
        .collect();

    chunks.into_iter().flat_map(move |chunk| {
        let rendered: Vec<VisemixResult<(FrameIndex, FrameRgb)>> = chunk
            .par_iter()
            .map(|record| render_frame(record, sprites, bg_rgb).map(|f| (record.index, f)))
            .collect();
        rendered
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::error::VisemixError;
    use crate::phoneme::stub_alignment;
    use crate::sprites::SpriteImage;

    fn tiny_sprites() -> SpriteSet {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[40u8, 40, 40, 255]);
        }
        let base = SpriteImage {
            width: 2,
            height: 2,
            rgba8_premul: Arc::new(data),
        };
        SpriteSet::new(base, None, BTreeMap::new()).unwrap()
    }

    #[test]
    fn rendered_frames_preserve_dense_index_order() {
        let sprites = tiny_sprites();
        let audio = AudioBuffer::new(vec![0.0; SAMPLE_RATE as usize * 3], SAMPLE_RATE).unwrap();
        let events = stub_alignment(audio.duration_secs());
        let mut timeline = VisemeTimeline::from_phonemes(&events, audio.duration_secs()).unwrap();
        timeline.smooth(&SmoothParams::default()).unwrap();
        let records =
            generate_schedule(&timeline, audio.duration_secs(), &ScheduleParams::default())
                .unwrap();
        let expected = records.len();
        assert!(expected > RENDER_CHUNK, "want several chunks");

        let mut next = 0u64;
        for item in rendered_frames(records, &sprites, [0, 0, 0]) {
            let (idx, frame) = item.unwrap();
            assert_eq!(idx.0, next);
            assert_eq!(frame.data.len(), FrameRgb::byte_len(2, 2));
            next += 1;
        }
        assert_eq!(next as usize, expected);
    }

    #[test]
    fn encoder_failure_propagates_out_of_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let sprites = tiny_sprites();
        let audio = AudioBuffer::new(vec![0.0; SAMPLE_RATE as usize], SAMPLE_RATE).unwrap();
        let events = stub_alignment(audio.duration_secs());
        let opts = PipelineOpts {
            encoder_program: "false".to_string(),
            ..Default::default()
        };
        let err = render_to_mp4(&events, &audio, &sprites, &dir.path().join("out.mp4"), &opts)
            .unwrap_err();
        assert!(matches!(err, VisemixError::Encode(_)), "{err}");
    }

    #[test]
    fn invalid_phonemes_fail_before_any_encoder_is_spawned() {
        let dir = tempfile::tempdir().unwrap();
        let sprites = tiny_sprites();
        let audio = AudioBuffer::new(vec![0.0; SAMPLE_RATE as usize], SAMPLE_RATE).unwrap();
        let events = vec![PhonemeEvent::new("AA", 0.5, 0.2)]; // end before start
        let err = render_to_mp4(
            &events,
            &audio,
            &sprites,
            &dir.path().join("out.mp4"),
            &PipelineOpts::default(),
        )
        .unwrap_err();
        assert!(matches!(err, VisemixError::Validation(_)), "{err}");
        assert!(!dir.path().join("out.mp4").exists());
    }
}
