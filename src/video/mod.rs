//! Video formats, color conversion, encoding, and the supervisor pipeline

pub mod convert;
pub mod encoder;
pub mod format;
pub mod pipeline;

pub use encoder::{EncodedFrame, VideoEncoder};
pub use format::{PixelFormat, Resolution};
pub use pipeline::VideoPipeline;
