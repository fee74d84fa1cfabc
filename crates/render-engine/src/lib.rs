//! Buttercut Render Engine
//!
//! Burns validated overlays into a source video with an external ffmpeg
//! process and records the outcome on the job.
//!
//! # Pipeline Architecture
//!
//! ```text
//! overlays (JSON) ──► validate ──► OverlaySpec[]
//!                                       │
//! input.mp4 ──► ffprobe ──► Canvas ─────┤
//!                  │                    ▼
//!                  │             compile filter graph
//!                  │                    │
//!                  └─ duration ──► supervise ffmpeg ──► progress=… ──► job store
//!                                       │
//!                                       ▼
//!                              <id>_output.partial.mp4
//!                                       │ finalize
//!                                       ▼
//!                                 <id>_output.mp4
//! ```

pub mod compiler;
pub mod probe;
pub mod progress;
pub mod supervisor;
pub mod worker;

pub use compiler::*;
pub use probe::*;
pub use progress::*;
pub use supervisor::*;
pub use worker::*;
