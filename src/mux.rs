//! Dual-stream muxing through an external `ffmpeg` process.
//!
//! The encoder consumes raw rgb24 frames on stdin and s16le PCM on a named
//! pipe; the two inputs cannot share one descriptor with the rawvideo
//! interface, and the encoder may block reads on either while the other must
//! keep flowing. Two writer threads therefore run in parallel, each owning
//! one stream, with a supervising loop that collects their results over a
//! channel, propagates the first failure into cancellation of the peer and
//! teardown of the subprocess, and only then waits for the encoder to exit.
//!
//! Backpressure is the pipes themselves: a writer blocking in `write` because
//! the encoder is not draining its side is the intended flow control, not an
//! error.

use std::{
    io::Write as _,
    os::fd::AsRawFd as _,
    os::unix::fs::OpenOptionsExt as _,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Duration,
};

use anyhow::Context as _;
use nix::{errno::Errno, fcntl::OFlag, sys::stat::Mode, unistd::mkfifo};
use tracing::debug;

use crate::{
    core::{Fps, FrameIndex},
    error::{VisemixError, VisemixResult},
    render::FrameRgb,
};

/// PCM chunk size for the audio writer; small enough that a dead encoder is
/// noticed promptly, large enough to keep syscall overhead down.
const PCM_CHUNK_BYTES: usize = 64 * 1024;

/// How often the supervisor polls the encoder while writers are in flight.
const SUPERVISE_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct MuxConfig {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    /// PCM sample rate of the audio stream (mono).
    pub sample_rate: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
    /// Encoder binary to spawn. Defaults to `ffmpeg`; overridable so failure
    /// paths can be exercised without a real encoder.
    pub encoder_program: String,
}

impl MuxConfig {
    pub fn new(width: u32, height: u32, fps: Fps, sample_rate: u32, out_path: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            fps,
            sample_rate,
            out_path: out_path.into(),
            overwrite: true,
            encoder_program: "ffmpeg".to_string(),
        }
    }

    pub fn validate(&self) -> VisemixResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(VisemixError::validation("mux width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // Default settings target yuv420p output for maximum compatibility.
            return Err(VisemixError::validation(
                "mux width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(VisemixError::validation("mux fps must be non-zero"));
        }
        if self.sample_rate == 0 {
            return Err(VisemixError::validation("mux sample_rate must be non-zero"));
        }
        Ok(())
    }
}

/// Synchronizer lifecycle. `Failed` is terminal and carries the error detail.
#[derive(Debug)]
pub enum MuxState {
    Idle,
    Launching,
    Streaming,
    Draining,
    Done,
    Failed(String),
}

/// Drives one encoder run: spawn, stream both inputs, drain, reap.
#[derive(Debug)]
pub struct FfmpegMuxer {
    cfg: MuxConfig,
    state: MuxState,
    child: Option<Child>,
    video_in: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    fifo_path: PathBuf,
    // Owns the directory holding the FIFO for the lifetime of the run.
    _tmp: tempfile::TempDir,
}

impl FfmpegMuxer {
    /// Create the audio FIFO and spawn the encoder.
    pub fn launch(cfg: MuxConfig) -> VisemixResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;
        if !cfg.overwrite && cfg.out_path.exists() {
            return Err(VisemixError::validation(format!(
                "output file '{}' already exists",
                cfg.out_path.display()
            )));
        }

        let tmp = tempfile::Builder::new()
            .prefix("visemix-mux-")
            .tempdir()
            .context("failed to create mux scratch directory")?;
        let fifo_path = tmp.path().join("audio.pcm");
        mkfifo(&fifo_path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| {
            VisemixError::encode(format!(
                "failed to create audio pipe '{}': {e}",
                fifo_path.display()
            ))
        })?;

        let mut cmd = Command::new(&cfg.encoder_program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if cfg.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
            "-f",
            "s16le",
            "-ar",
            &cfg.sample_rate.to_string(),
            "-ac",
            "1",
            "-i",
        ])
        .arg(&fifo_path)
        .args([
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-shortest",
            "-movflags",
            "+faststart",
        ])
        .arg(&cfg.out_path);

        debug!(program = %cfg.encoder_program, out = %cfg.out_path.display(), "launching encoder");

        let mut child = cmd.spawn().map_err(|e| {
            VisemixError::encode(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                cfg.encoder_program
            ))
        })?;

        let video_in = child
            .stdin
            .take()
            .ok_or_else(|| VisemixError::encode("failed to open encoder stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VisemixError::encode("failed to open encoder stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            use std::io::Read as _;
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        Ok(Self {
            cfg,
            state: MuxState::Streaming,
            child: Some(child),
            video_in: Some(video_in),
            stderr_drain: Some(stderr_drain),
            fifo_path,
            _tmp: tmp,
        })
    }

    pub fn state(&self) -> &MuxState {
        &self.state
    }

    /// Stream every frame and the full PCM buffer, then drain the encoder.
    ///
    /// `frames` must yield records in dense index order starting at 0; the
    /// writer rejects gaps and repeats. Returns once the encoder has exited
    /// and both streams are fully delivered, or with the first failure after
    /// the subprocess has been torn down.
    pub fn stream<I>(&mut self, frames: I, pcm: &[u8]) -> VisemixResult<()>
    where
        I: Iterator<Item = VisemixResult<(FrameIndex, FrameRgb)>> + Send,
    {
        if !matches!(self.state, MuxState::Streaming) {
            return Err(VisemixError::encode("muxer is not in the streaming state"));
        }
        let mut video_in = self
            .video_in
            .take()
            .ok_or_else(|| VisemixError::encode("encoder stdin already consumed"))?;
        let fifo_path = self.fifo_path.clone();
        let (frame_w, frame_h) = (self.cfg.width, self.cfg.height);
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| VisemixError::encode("encoder process already reaped"))?;

        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(Stream, Result<(), WriterError>)>();

        let mut video_res: Option<Result<(), WriterError>> = None;
        let mut audio_res: Option<Result<(), WriterError>> = None;
        let mut encoder_exited_early = false;

        std::thread::scope(|s| {
            let video_tx = tx.clone();
            let stop_ref = &stop;
            s.spawn(move || {
                let res = write_video_stream(&mut video_in, frames, frame_w, frame_h, stop_ref);
                drop(video_in); // end-of-stream for the pixel pipe
                let _ = video_tx.send((Stream::Video, res));
            });

            let audio_tx = tx;
            s.spawn(move || {
                let res = write_audio_stream(&fifo_path, pcm, stop_ref);
                let _ = audio_tx.send((Stream::Audio, res));
            });

            // Supervise: collect both results, watching for an encoder that
            // dies while writers are still blocked on its pipes.
            while video_res.is_none() || audio_res.is_none() {
                match rx.recv_timeout(SUPERVISE_POLL) {
                    Ok((stream, res)) => {
                        match &res {
                            Err(WriterError::Fatal(_)) if !stop.load(Ordering::Relaxed) => {
                                stop.store(true, Ordering::Relaxed);
                                let _ = child.kill();
                            }
                            Err(WriterError::PipeClosed(_)) if !stop.load(Ordering::Relaxed) => {
                                // The encoder is done with that stream, for
                                // better or worse. Killing it here could
                                // truncate a file still being finalized, so
                                // only note an exit that already happened and
                                // otherwise let the exit poll decide.
                                if let Ok(Some(_)) = child.try_wait() {
                                    encoder_exited_early = true;
                                    stop.store(true, Ordering::Relaxed);
                                }
                            }
                            _ => {}
                        }
                        match stream {
                            Stream::Video => video_res = Some(res),
                            Stream::Audio => audio_res = Some(res),
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if !stop.load(Ordering::Relaxed)
                            && let Ok(Some(_)) = child.try_wait()
                        {
                            encoder_exited_early = true;
                            stop.store(true, Ordering::Relaxed);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        self.state = MuxState::Draining;
        let vanished = || Err(WriterError::fatal("stream writer vanished"));
        let outcome = self.drain(
            video_res.unwrap_or_else(vanished),
            audio_res.unwrap_or_else(vanished),
            encoder_exited_early,
        );
        match outcome {
            Ok(()) => {
                self.state = MuxState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = MuxState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Wait for the encoder to exit and pick the root-cause error.
    ///
    /// A closed pipe on the writer side is only a failure when the encoder
    /// itself failed: with `-shortest` the encoder may stop reading a hair
    /// before the final write and still produce a complete file.
    fn drain(
        &mut self,
        video_res: Result<(), WriterError>,
        audio_res: Result<(), WriterError>,
        encoder_exited_early: bool,
    ) -> VisemixResult<()> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| VisemixError::encode("encoder process already reaped"))?;
        let status = child.wait().map_err(|e| {
            VisemixError::encode(format!("failed to wait for encoder to finish: {e}"))
        })?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| VisemixError::encode("encoder stderr drain thread panicked"))?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let exit_error = || {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            VisemixError::encode(format!(
                "encoder exited with status {}: {}",
                status,
                stderr.trim()
            ))
        };

        if encoder_exited_early && !status.success() {
            return Err(exit_error());
        }
        let fatal = |res: Result<(), WriterError>| match res {
            Err(WriterError::Fatal(e)) => Some(e),
            _ => None,
        };
        let pipe_closed = matches!(video_res, Err(WriterError::PipeClosed(_)))
            || matches!(audio_res, Err(WriterError::PipeClosed(_)));
        if let Some(e) = fatal(video_res).or_else(|| fatal(audio_res)) {
            return Err(e);
        }
        if !status.success() {
            return Err(exit_error());
        }
        if pipe_closed {
            debug!("encoder closed a pipe before the final write but exited cleanly");
        }
        debug!("encoder exited cleanly");
        Ok(())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        // A failed or abandoned run must not leak the subprocess.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Video,
    Audio,
}

/// Writer-thread outcome detail. Closed pipes and supervisor-requested
/// cancellation are kept apart from genuine failures because their severity
/// depends on how the encoder exited.
#[derive(Debug)]
enum WriterError {
    PipeClosed(String),
    Canceled,
    Fatal(VisemixError),
}

impl WriterError {
    fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(VisemixError::encode(msg))
    }

    fn from_io(e: std::io::Error, what: &str) -> Self {
        if e.kind() == std::io::ErrorKind::BrokenPipe {
            Self::PipeClosed(format!("encoder closed {what} early: {e}"))
        } else {
            Self::Fatal(VisemixError::encode(format!("failed to write {what}: {e}")))
        }
    }
}

impl From<VisemixError> for WriterError {
    fn from(e: VisemixError) -> Self {
        Self::Fatal(e)
    }
}

fn write_video_stream<I>(
    video_in: &mut ChildStdin,
    frames: I,
    width: u32,
    height: u32,
    stop: &AtomicBool,
) -> Result<(), WriterError>
where
    I: Iterator<Item = VisemixResult<(FrameIndex, FrameRgb)>>,
{
    let expected_len = FrameRgb::byte_len(width, height);
    let mut next_idx = 0u64;
    for item in frames {
        if stop.load(Ordering::Relaxed) {
            return Err(WriterError::Canceled);
        }
        let (idx, frame) = item?;
        expect_next_index(next_idx, idx)?;
        if frame.width != width || frame.height != height {
            return Err(VisemixError::render(format!(
                "frame {} size mismatch: got {}x{}, expected {width}x{height}",
                idx.0, frame.width, frame.height
            ))
            .into());
        }
        if frame.data.len() != expected_len {
            return Err(VisemixError::render(format!(
                "frame {} byte length mismatch with width*height*3",
                idx.0
            ))
            .into());
        }
        video_in
            .write_all(&frame.data)
            .map_err(|e| WriterError::from_io(e, "the video pipe"))?;
        next_idx += 1;
    }
    debug!(frames = next_idx, "video stream complete");
    Ok(())
}

fn expect_next_index(expected: u64, got: FrameIndex) -> VisemixResult<()> {
    if got.0 != expected {
        return Err(VisemixError::encode(format!(
            "frame index {} out of order (expected {expected})",
            got.0
        )));
    }
    Ok(())
}

fn write_audio_stream(fifo_path: &Path, pcm: &[u8], stop: &AtomicBool) -> Result<(), WriterError> {
    let mut fifo = open_fifo_writer(fifo_path, stop)?;
    for chunk in pcm.chunks(PCM_CHUNK_BYTES) {
        if stop.load(Ordering::Relaxed) {
            return Err(WriterError::Canceled);
        }
        fifo.write_all(chunk)
            .map_err(|e| WriterError::from_io(e, "the audio pipe"))?;
    }
    fifo.flush()
        .map_err(|e| WriterError::from_io(e, "the audio pipe"))?;
    debug!(bytes = pcm.len(), "audio stream complete");
    Ok(())
}

/// Open the FIFO write end without committing to a block.
///
/// A plain blocking open would hang forever if the encoder dies before it
/// opens its read end, so poll with `O_NONBLOCK` (ENXIO means no reader yet)
/// until the encoder connects or the run is canceled, then restore blocking
/// writes for normal backpressure.
fn open_fifo_writer(path: &Path, stop: &AtomicBool) -> Result<std::fs::File, WriterError> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(WriterError::Canceled);
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)
        {
            Ok(file) => {
                nix::fcntl::fcntl(file.as_raw_fd(), nix::fcntl::FcntlArg::F_SETFL(OFlag::empty()))
                    .map_err(|e| {
                        WriterError::fatal(format!("failed to restore blocking audio pipe: {e}"))
                    })?;
                return Ok(file);
            }
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                return Err(WriterError::fatal(format!(
                    "failed to open audio pipe '{}': {e}",
                    path.display()
                )));
            }
        }
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> VisemixResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg(dir: &Path, program: &str) -> MuxConfig {
        let mut cfg = MuxConfig::new(
            64,
            64,
            Fps::lipsync_default(),
            22_050,
            dir.join("out.mp4"),
        );
        cfg.encoder_program = program.to_string();
        cfg
    }

    fn black_frames(count: u64) -> impl Iterator<Item = VisemixResult<(FrameIndex, FrameRgb)>> {
        (0..count).map(|i| {
            Ok((
                FrameIndex(i),
                FrameRgb {
                    width: 64,
                    height: 64,
                    data: vec![0u8; FrameRgb::byte_len(64, 64)],
                },
            ))
        })
    }

    #[test]
    fn config_validation_catches_bad_values() {
        let fps = Fps::lipsync_default();
        assert!(MuxConfig::new(0, 64, fps, 22_050, "out.mp4").validate().is_err());
        assert!(MuxConfig::new(63, 64, fps, 22_050, "out.mp4").validate().is_err());
        assert!(MuxConfig::new(64, 64, fps, 0, "out.mp4").validate().is_err());
        assert!(MuxConfig::new(64, 64, fps, 22_050, "out.mp4").validate().is_ok());
    }

    #[test]
    fn out_of_order_frame_indices_are_rejected() {
        expect_next_index(3, FrameIndex(3)).unwrap();
        assert!(expect_next_index(3, FrameIndex(4)).is_err());
        assert!(expect_next_index(3, FrameIndex(2)).is_err());
    }

    #[test]
    fn launch_failure_surfaces_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegMuxer::launch(test_cfg(dir.path(), "visemix-no-such-encoder")).unwrap_err();
        assert!(matches!(err, VisemixError::Encode(_)), "{err}");
        assert!(err.to_string().contains("spawn"), "{err}");
    }

    #[test]
    fn encoder_exiting_nonzero_reaches_failed_with_no_live_child() {
        // `false` exits immediately without reading either input: the video
        // writer hits a broken pipe, the audio writer never finds a reader,
        // and the supervisor must still reap the process.
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = FfmpegMuxer::launch(test_cfg(dir.path(), "false")).unwrap();
        let pcm = vec![0u8; 22_050 * 2];
        let err = muxer.stream(black_frames(16), &pcm).unwrap_err();
        assert!(matches!(err, VisemixError::Encode(_)), "{err}");
        assert!(matches!(muxer.state(), MuxState::Failed(_)));
        assert!(muxer.child.is_none(), "encoder process handle must be reaped");
    }

    #[test]
    fn failing_frame_producer_tears_down_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let mut muxer = FfmpegMuxer::launch(test_cfg(dir.path(), "false")).unwrap();
        let frames = std::iter::once(Err(VisemixError::render("sprite buffer corrupt")));
        let err = muxer.stream(frames, &[0u8; 16]).unwrap_err();
        // Either the producer error or the encoder's own death may win the
        // race; both must leave the muxer terminal with the child reaped.
        assert!(
            matches!(err, VisemixError::Render(_) | VisemixError::Encode(_)),
            "{err}"
        );
        assert!(matches!(muxer.state(), MuxState::Failed(_)));
        assert!(muxer.child.is_none());
    }
}
