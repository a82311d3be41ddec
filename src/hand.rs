//! Hand landmarks, their detection, and the gestures read from them.

pub mod detector;
pub mod gesture;
pub mod landmark;
pub mod palm;
