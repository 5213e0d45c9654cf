pub mod chunk;
pub mod clip;
pub mod config;
pub mod decoder_config;
pub mod diagnostics;
pub mod error;
pub mod state;
