//! Demo tools around the TensorFlow filter: a viewer that shows the frames
//! the filter posts back, and a publisher that feeds it sample images.

pub mod net;
pub mod payload;
pub mod predictions;
pub mod publisher;
pub mod slot;
pub mod view;

pub use net::{http, mqtt};
pub use slot::FrameSlot;
