pub mod error;
pub mod inference;
pub mod pipeline;
pub mod processing;
pub mod rcnn;
pub mod utils;

pub use error::{DetectionError, Result};
pub use inference::{Inference, NpyReplay};
pub use pipeline::config::FaceDetectionConfig;
pub use pipeline::face_detection::{detect_faces, Coordinate2D, Detection, FaceLandmark, RetinaFaceDetection};
