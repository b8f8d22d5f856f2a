//! Visemix turns a time-stamped phoneme stream plus a mono audio clip into a
//! sprite-composited lip-sync MP4.
//!
//! # Pipeline overview
//!
//! 1. **Timeline**: phoneme events -> gap-filled, smoothed viseme intervals
//!    (`VisemeTimeline`)
//! 2. **Schedule**: timeline + seed -> one `FrameRecord` per output frame,
//!    with blink windows and vertical jitter from a keyed generator
//! 3. **Render**: `FrameRecord` -> composited rgb24 frame (`FrameRgb`)
//! 4. **Mux**: frames on stdin plus PCM on a named pipe, streamed into the
//!    system `ffmpeg` binary for H.264+AAC MP4 output
//!
//! Key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Deterministic-by-default**: the same inputs and seed produce the same
//!   frame bytes on every run; randomness is a pure function of
//!   `(seed, frame index)`.
//! - **No IO in renderers**: sprites and audio are loaded and validated up
//!   front; frame rendering touches only shared read-only data.
//! - **Premultiplied RGBA8** through compositing, flattened to rgb24 only at
//!   the encoder boundary.
#![forbid(unsafe_code)]

pub mod audio;
pub mod composite;
pub mod core;
pub mod error;
pub mod mux;
pub mod phoneme;
pub mod pipeline;
pub mod render;
pub mod schedule;
pub mod sprites;
pub mod timeline;
pub mod viseme;

pub use audio::{AudioBuffer, SAMPLE_RATE};
pub use core::{Fps, FrameIndex, frame_count};
pub use error::{VisemixError, VisemixResult};
pub use mux::{FfmpegMuxer, MuxConfig, MuxState, is_ffmpeg_on_path};
pub use phoneme::{PhonemeEvent, events_from_json, stub_alignment};
pub use pipeline::{PipelineOpts, PipelineReport, render_to_mp4};
pub use render::{FrameRgb, render_frame};
pub use schedule::{FrameRecord, ScheduleParams, generate_schedule};
pub use sprites::{SpriteImage, SpriteSet};
pub use timeline::{SmoothParams, VisemeTimeline};
pub use viseme::Viseme;
