//! Lapse Render Engine
//!
//! Turns an ordered photo sequence into an H.264 timelapse.
//!
//! # Pipeline Architecture
//!
//! ```text
//! PhotoStore ──► decode ──► scale to working size ──┐
//!                                                   │  (morph: cross-dissolve pairs)
//!                                      BufferPool ──┤
//!                                                   ▼
//!                                             FrameWriter ◄── readiness polling
//!                                                   │
//!                                                   ▼
//!                                  EncoderSession (ffmpeg, rawvideo BGRA)
//!                                                   │
//!                                                   ▼
//!                                   Timelapses/timelapse-<timestamp>.mp4
//! ```

pub mod blend;
pub mod encoder;
pub mod engine;
pub mod ffmpeg;
pub mod frame;
pub mod pool;
pub mod service;

pub use blend::{blend_into, morph_alpha};
pub use encoder::*;
pub use engine::*;
pub use ffmpeg::{ffmpeg_args, is_ffmpeg_on_path, FfmpegEncoderFactory, FfmpegSession};
pub use frame::{working_resolution, FrameBuffer, BYTES_PER_PIXEL};
pub use pool::{BufferPool, PoolStats};
pub use service::*;
