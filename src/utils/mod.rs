//! Utility Module
//!
//! - [`FpsCounter`]: Frame rate measurement
//! - [`ChangeTracker`]: Version counter for change detection

pub mod change_tracker;
pub mod fps_counter;

pub use change_tracker::ChangeTracker;
pub use fps_counter::FpsCounter;
