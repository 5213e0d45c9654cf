//! # replay-core
//!
//! Rolling-window capture-and-replay engine.
//!
//! Continuously encodes a live video/audio source into per-track chunks,
//! keeps the trailing N seconds in memory aligned to decodable boundaries,
//! and on demand muxes that window into a standalone Matroska/WebM clip.
//! Native encoders (e.g. `replay-openh264`) implement `EncoderFactory`; the
//! embedder supplies a `SourceProvider` and decides when to start, pause and
//! materialize.
//!
//! ## Architecture
//!
//! ```text
//! replay-core (this crate)
//! ├── traits/       ← FrameSource, MediaSource, SourceProvider, TrackEncoder, EncoderFactory,
//! │                   ContainerMuxer, ReplayDelegate
//! ├── models/       ← EncodedChunk, DecoderConfig, ReplayConfiguration, ReplayError, SessionState, clips
//! ├── processing/   ← SessionClock, TrackEncoderAdapter, codec negotiation, RetentionBuffer, H.264, PCM
//! ├── container/    ← EBML writer, MatroskaMuxer, clip inspection
//! ├── session/      ← CapturePipeline, ClipMaterializer, CaptureController
//! ├── sources/      ← channel-backed push-to-pull frame sources
//! └── legacy/       ← StaggeredReplay (whole-stream recorder rotation)
//! ```

pub mod container;
pub mod legacy;
pub mod models;
pub mod processing;
pub mod session;
pub mod sources;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use container::matroska::MatroskaMuxer;
pub use legacy::staggered::{Recording, StaggeredReplay, WholeStreamRecorder};
pub use models::chunk::{EncodedChunk, EncoderOutput, FrameFormat, RawFrame, TrackKind};
pub use models::clip::{ClipMetadata, ClipTrack, MaterializedClip};
pub use models::config::ReplayConfiguration;
pub use models::decoder_config::{AudioCodec, AudioDecoderConfig, DecoderConfig, VideoCodec, VideoDecoderConfig};
pub use models::diagnostics::{SessionDiagnostics, TrackDiagnostics};
pub use models::error::ReplayError;
pub use models::state::{SessionState, StartOutcome};
pub use processing::clock::{Clock, ManualClock, SessionClock};
pub use processing::negotiation::EncoderRegistry;
pub use processing::retention::{BufferSnapshot, RetentionBuffer};
pub use session::controller::CaptureController;
pub use session::materializer::ClipMaterializer;
pub use session::pipeline::CapturePipeline;
pub use sources::channel::{frame_channel, ChannelFrameSource, ChannelMediaSource, FrameSender, SourceSlot};
pub use traits::container_muxer::ContainerMuxer;
pub use traits::media_source::{FrameRead, FrameSource, MediaSource, SourceProvider, TrackSettings};
pub use traits::replay_delegate::ReplayDelegate;
pub use traits::track_encoder::{EncodedOutput, EncoderFactory, TrackEncoder, TrackParameters};
