//! Feed handoff, the synchronous detection core and the tasks driving it.

pub mod engine;
pub mod handoff;
pub mod runner;
pub mod storage_stage;

pub use engine::DetectionPipeline;
pub use handoff::FeedHandoff;
