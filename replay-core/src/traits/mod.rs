pub mod container_muxer;
pub mod media_source;
pub mod replay_delegate;
pub mod track_encoder;
