//! Response-streaming and voice-feedback coordinator.
//!
//! Three independently-timed async sources — the analysis stream, the
//! recognition capture, and the synthesis playback — funnel into one actor
//! task, so observable state never holds contradictory values and stale
//! events from superseded operations are dropped by handle comparison.

pub mod coordinator;
pub mod decode;
pub mod guard;
pub mod ingest;
pub mod narration;
pub mod recording;

pub use coordinator::{Command, Coordinator, CoordinatorHandle, ReplyPhase, UiState};
