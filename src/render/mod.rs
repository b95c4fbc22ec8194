//! Frame rendering for the road grid
//!
//! Draws the grid and the cars of a snapshot into a tiny-skia pixmap that can
//! be written out as PNG.

pub mod renderer;

pub use renderer::{FrameLayout, FrameRenderer, RenderError, save_png};
