//! Small process-related helpers shared across the workspace.
//!
//! Besides spawning children without a console window on Windows, this crate
//! understands the `key=value` block format ffmpeg writes when invoked with
//! `-progress pipe:1`, so callers can turn it into a percentage.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// One completed block of ffmpeg `-progress` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FfmpegProgress {
    /// Encoded media time so far, in microseconds (`out_time_us`/`out_time_ms`).
    pub out_time_us: Option<u64>,
    /// `true` once ffmpeg reports `progress=end`.
    pub finished: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_us` covered so far, clamped to `0..=100`.
    ///
    /// Returns `None` when either side of the ratio is unknown.
    pub fn percent_of(&self, total_us: Option<u64>) -> Option<u8> {
        if self.finished {
            return Some(100);
        }
        let done = self.out_time_us?;
        let total = total_us.filter(|t| *t > 0)?;
        let pct = (done.saturating_mul(100) / total).min(100);
        Some(pct as u8)
    }
}

/// Incremental parser for ffmpeg `-progress pipe:1` output.
///
/// Feed it one line at a time; it yields a snapshot whenever a block ends
/// with a `progress=continue` or `progress=end` line.
#[derive(Debug, Default)]
pub struct FfmpegProgressParser {
    current: FfmpegProgress,
}

impl FfmpegProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key.trim() {
            // ffmpeg historically reports microseconds under both names.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.current.out_time_us = Some(us);
                }
                None
            }
            "progress" => {
                self.current.finished = value == "end";
                let snapshot = self.current;
                self.current = FfmpegProgress::default();
                Some(snapshot)
            }
            _ => None,
        }
    }
}

/// Parse the `format=duration` value printed by
/// `ffprobe -show_entries format=duration -of csv=p=0` into microseconds.
pub fn parse_probe_duration_us(output: &str) -> Option<u64> {
    let secs: f64 = output.lines().next()?.trim().parse().ok()?;
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some((secs * 1_000_000.0) as u64)
}
