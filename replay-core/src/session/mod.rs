pub mod controller;
pub mod materializer;
pub mod pipeline;
