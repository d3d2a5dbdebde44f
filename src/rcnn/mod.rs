pub mod anchors;
pub mod bbox;
pub mod stride;
