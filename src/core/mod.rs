//! Query planning, result post-processing and library updates

pub mod merge;
pub mod planner;
pub mod postprocess;
pub mod update;

pub use planner::QueryPlanner;
pub use postprocess::PostProcessor;
pub use update::LibraryUpdater;
