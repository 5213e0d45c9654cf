pub mod clock;
pub mod encoder_adapter;
pub mod h264;
pub mod negotiation;
pub mod pcm;
pub mod retention;
