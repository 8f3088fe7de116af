pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod error;
pub mod features;
pub mod inference;
pub mod label;
pub mod onnx;
pub mod record;
pub mod render;
pub mod storage;
pub mod video;
