//! Media transformation pipeline.

pub mod ffmpeg;
pub mod transcoder;
pub mod watermark;

pub use ffmpeg::FfmpegTranscoder;
pub use transcoder::{
    ImageCompress, MediaTranscoder, TextOverlay, VideoOverlay, VideoResize,
};
pub use watermark::WatermarkPipeline;
