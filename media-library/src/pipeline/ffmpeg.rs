//! ffmpeg-backed [`MediaTranscoder`].
//!
//! Videos and text overlays go through the ffmpeg CLI; image resizing and
//! recompression use the `image` crate on the blocking pool.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use process_utils::{FfmpegProgressParser, parse_probe_duration_us, tokio_command};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::transcoder::{ImageCompress, MediaTranscoder, TextOverlay, VideoOverlay, VideoResize};
use crate::config::PipelineConfig;
use crate::progress::{ProgressReporter, ProgressStage};
use crate::{Error, Result};

/// stderr lines kept for the failure message.
const STDERR_TAIL_LINES: usize = 12;

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.ffmpeg_path, &config.ffprobe_path)
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostdin", "-y"])
            .env("LC_ALL", "C");
        cmd
    }

    /// Container duration in microseconds; `None` when ffprobe is missing
    /// or cannot tell.
    async fn probe_duration_us(&self, input: &Path) -> Option<u64> {
        let output = tokio_command(&self.ffprobe_path)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                parse_probe_duration_us(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                debug!(status = ?out.status, "ffprobe could not read duration");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to run ffprobe; progress will be coarse");
                None
            }
        }
    }
}

/// Next line of a child pipe, decoded lossily. `None` at EOF or on a read
/// error; either way the pipe has nothing more to give.
async fn next_pipe_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    pipe: &'static str,
) -> Option<String> {
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => Some(String::from_utf8_lossy(buf).trim_end().to_string()),
        Err(e) => {
            warn!(pipe, error = %e, "Failed to read ffmpeg output");
            None
        }
    }
}

/// Run ffmpeg with `-progress pipe:1`, forwarding percentages to `progress`.
async fn run_ffmpeg_with_progress(
    stage_name: &'static str,
    mut cmd: Command,
    total_us: Option<u64>,
    progress: &ProgressReporter,
    stage: ProgressStage,
) -> Result<()> {
    cmd.args(["-progress", "pipe:1", "-nostats"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::pipeline(stage_name, format!("failed to spawn ffmpeg: {e}")))?;

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Some(line) = next_pipe_line(&mut reader, &mut buf, "stderr").await {
                debug!("ffmpeg: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        })
    });

    progress.report(stage, 0);
    if let Some(stdout) = child.stdout.take() {
        let mut parser = FfmpegProgressParser::new();
        let mut last_pct = 0u8;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        // Runs to EOF; the reader drops before `wait`, so ffmpeg never blocks
        // on a full progress pipe.
        while let Some(line) = next_pipe_line(&mut reader, &mut buf, "stdout").await {
            let Some(snapshot) = parser.push_line(&line) else {
                continue;
            };
            if let Some(pct) = snapshot.percent_of(total_us)
                && pct != last_pct
            {
                last_pct = pct;
                progress.report(stage, pct);
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::pipeline(stage_name, format!("failed to wait for ffmpeg: {e}")))?;
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        return Err(Error::pipeline(
            stage_name,
            format!(
                "ffmpeg exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr_tail
            ),
        ));
    }
    progress.report(stage, 100);
    Ok(())
}

/// Map a 1..=100 JPEG quality onto ffmpeg's mjpeg `-q:v` scale (2 best, 31 worst).
fn mjpeg_qscale(quality: u8) -> u32 {
    let quality = u32::from(quality.clamp(1, 100));
    31 - (quality - 1) * 29 / 99
}

/// Escape a value for use inside a single-quoted drawtext option.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '\'' | ':' | '%' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn compress_blocking(job: &ImageCompress) -> Result<()> {
    let img = image::open(&job.input)
        .map_err(|e| Error::pipeline("compress", format!("cannot decode image: {e}")))?;

    let (width, height) = img.dimensions();
    let resized = if width > job.width && width > 0 {
        let target_height = ((u64::from(height) * u64::from(job.width)) / u64::from(width)).max(1);
        img.resize_exact(job.width, target_height as u32, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let file = std::fs::File::create(&job.output)
        .map_err(|e| Error::pipeline("compress", format!("cannot create output: {e}")))?;
    let writer = std::io::BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(writer, job.quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
        .map_err(|e| Error::pipeline("compress", format!("cannot encode image: {e}")))
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn probe_width(&self, image: &Path) -> Result<u32> {
        let path = image.to_path_buf();
        let (width, _) = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
            .await
            .map_err(|e| Error::pipeline("probe", format!("probe task failed: {e}")))?
            .map_err(|e| Error::pipeline("probe", format!("cannot read image size: {e}")))?;
        Ok(width)
    }

    async fn resize_video(&self, job: &VideoResize, progress: &ProgressReporter) -> Result<()> {
        let total_us = self.probe_duration_us(&job.input).await;
        // -2 keeps the height even, which H.264 requires.
        let scale = format!("scale={}:-2", job.width);
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(&job.input)
            .args(["-vf", scale.as_str()])
            .args(["-c:a", "copy"])
            .arg(&job.output);
        debug!(input = %job.input.display(), width = job.width, "Resizing video");
        run_ffmpeg_with_progress("resize", cmd, total_us, progress, ProgressStage::VideoConvert)
            .await
    }

    async fn overlay_video(&self, job: &VideoOverlay, progress: &ProgressReporter) -> Result<()> {
        let total_us = self.probe_duration_us(&job.input).await;
        let (x, y) = job.offset;
        let filter = format!("overlay={x}:{y}");
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(&job.input)
            .arg("-i")
            .arg(&job.overlay)
            .args(["-filter_complex", filter.as_str()])
            .args(["-c:a", "copy"])
            .arg(&job.output);
        debug!(input = %job.input.display(), "Overlaying watermark");
        run_ffmpeg_with_progress("overlay", cmd, total_us, progress, ProgressStage::Watermarking)
            .await
    }

    async fn compress_image(&self, job: &ImageCompress) -> Result<()> {
        let job = job.clone();
        tokio::task::spawn_blocking(move || compress_blocking(&job))
            .await
            .map_err(|e| Error::pipeline("compress", format!("compress task failed: {e}")))?
    }

    async fn print_text(&self, job: &TextOverlay) -> Result<()> {
        let (x, y) = job.offset;
        let filter = format!(
            "drawtext=text='{}':x={x}:y={y}:fontsize={}:fontcolor=white",
            escape_drawtext(&job.text),
            job.font_size
        );
        let qscale = mjpeg_qscale(job.quality).to_string();
        let mut cmd = self.ffmpeg();
        cmd.arg("-i")
            .arg(&job.input)
            .args(["-vf", filter.as_str()])
            .args(["-q:v", qscale.as_str()])
            .arg(&job.output);
        run_ffmpeg_with_progress(
            "text-overlay",
            cmd,
            None,
            &ProgressReporter::noop(),
            ProgressStage::Watermarking,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawtext_escaping() {
        assert_eq!(escape_drawtext("@Christoph  Bärtsch"), "@Christoph  Bärtsch");
        assert_eq!(escape_drawtext("a:b'c%"), "a\\:b\\'c\\%");
    }

    #[tokio::test]
    async fn pipe_lines_survive_invalid_utf8() {
        let mut reader: &[u8] = b"out_time_us=1000\n\xff\xfe garbage\nprogress=end\n";
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = next_pipe_line(&mut reader, &mut buf, "stdout").await {
            lines.push(line);
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "out_time_us=1000");
        assert_eq!(lines[2], "progress=end");
    }

    #[test]
    fn text_overlay_quality_maps_to_qscale() {
        assert_eq!(mjpeg_qscale(100), 2);
        assert_eq!(mjpeg_qscale(1), 31);
        assert_eq!(mjpeg_qscale(0), 31);
        assert_eq!(mjpeg_qscale(60), 14);
        assert!(mjpeg_qscale(40) > mjpeg_qscale(60));
    }

    #[tokio::test]
    async fn compress_downscales_and_probes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        image::RgbaImage::from_pixel(400, 200, image::Rgba([10, 20, 30, 255]))
            .save(&input)
            .unwrap();

        let transcoder = FfmpegTranscoder::new("ffmpeg", "ffprobe");
        assert_eq!(transcoder.probe_width(&input).await.unwrap(), 400);

        let output = dir.path().join("out.jpg");
        transcoder
            .compress_image(&ImageCompress {
                input: input.clone(),
                output: output.clone(),
                width: 100,
                quality: 40,
            })
            .await
            .unwrap();
        assert_eq!(image::image_dimensions(&output).unwrap(), (100, 50));
    }

    #[tokio::test]
    async fn compress_keeps_small_images() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("small.png");
        image::RgbImage::from_pixel(60, 30, image::Rgb([1, 2, 3]))
            .save(&input)
            .unwrap();
        let output = dir.path().join("small.jpg");

        FfmpegTranscoder::new("ffmpeg", "ffprobe")
            .compress_image(&ImageCompress {
                input,
                output: output.clone(),
                width: 1080,
                quality: 60,
            })
            .await
            .unwrap();
        assert_eq!(image::image_dimensions(&output).unwrap(), (60, 30));
    }

    #[tokio::test]
    async fn undecodable_image_is_pipeline_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("junk.jpg");
        std::fs::write(&input, b"not an image").unwrap();

        let err = FfmpegTranscoder::new("ffmpeg", "ffprobe")
            .compress_image(&ImageCompress {
                input,
                output: dir.path().join("out.jpg"),
                width: 100,
                quality: 40,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PipelineFailure);
    }

    #[tokio::test]
    async fn missing_binary_is_pipeline_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = FfmpegTranscoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = transcoder
            .resize_video(
                &VideoResize {
                    input: dir.path().join("in.mp4"),
                    output: dir.path().join("out.mp4"),
                    width: 1920,
                },
                &ProgressReporter::noop(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PipelineFailure { stage: "resize", .. }));
    }
}
