pub mod bounding_box;
pub mod frame;
pub mod interfaces;
pub mod roi_tracker;
pub mod session;
pub mod signal_buffer;
pub mod spectral;
