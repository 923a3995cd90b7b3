mod briefing;
mod pipeline;
mod tagger;

pub use pipeline::{CycleReport, Pipeline};
