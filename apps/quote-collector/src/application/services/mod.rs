//! Application Services
//!
//! - `CollectionLoop`: drives periodic fetch → normalize → assemble → persist
//!   cycles and contains every cycle failure

mod collection_loop;

pub use collection_loop::{
    CollectionLoop, CycleError, CycleReport, LoopSettings, LoopSummary, SourceStatus,
};
