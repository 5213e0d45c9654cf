//! # replay-openh264
//!
//! H.264 encoder backend for replay-core, built on the `openh264` crate.
//!
//! Provides:
//! - `OpenH264Factory`: `EncoderFactory` accepting `VideoCodec::H264`
//! - `OpenH264Encoder`: BGRA → I420 conversion, forced IDR frames, `avcC`
//!   decoder configuration from the first keyframe's SPS/PPS
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use replay_core::{EncoderRegistry, CaptureController};
//! use replay_openh264::OpenH264Factory;
//!
//! let mut registry = EncoderRegistry::with_defaults();
//! registry.register(Arc::new(OpenH264Factory));
//! ```

pub mod encoder;

pub use encoder::{bgra_to_i420, OpenH264Encoder, OpenH264Error, OpenH264Factory};
