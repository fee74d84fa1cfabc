//! Buttercut Job Model
//!
//! Defines the core data contracts for render jobs:
//! - **Overlays:** typed text/image/video declarations and their validation
//! - **Jobs:** the persisted render record and its forward-only lifecycle
//! - **Stores:** the narrow get/upsert contract the render worker writes through
//!
//! Overlay positions are normalized to `[0.0, 1.0]` relative to the canvas
//! so they survive any source resolution.

pub mod error;
pub mod job;
pub mod overlay;
pub mod store;

pub use error::*;
pub use job::*;
pub use overlay::*;
pub use store::*;
