//! Media I/O
//!
//! Video decode, encode and remux behind an `ffmpeg` subprocess exchanging
//! raw `bgr24` frames over pipes, with stream metadata from `ffprobe`.
//! Codec internals, flag tuning and audio handling beyond track copying are
//! out of scope; this seam is deliberately thin so the rest of the engine
//! treats media as an opaque frame source and sink.

mod ffmpeg;

pub use ffmpeg::{probe, remux_audio, VideoMeta, VideoReader, VideoWriter};
