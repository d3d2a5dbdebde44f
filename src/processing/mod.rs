pub mod bbox_transform;
pub mod coordinate;
pub mod nms;
pub mod preprocess;
