//! Data models for qrchoice.

mod detection;
mod value;

pub use detection::{
    Detection, DetectionRun, Fragment, ImageInput, ImageRecord, Point, Polygon, RunConstraints,
};
pub use value::Value;
