pub mod config;
pub mod decode;
pub mod face_detection;
pub mod net_outputs;
