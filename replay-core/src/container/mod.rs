pub mod demux;
pub mod ebml;
pub mod matroska;
