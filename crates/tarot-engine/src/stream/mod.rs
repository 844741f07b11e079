//! Progressive delivery: typed SSE events and the staged reading stream.

pub mod events;
pub mod generator;

pub use events::{EventStream, ReadingStage, SseEvent};
pub use generator::StreamingReadingService;
