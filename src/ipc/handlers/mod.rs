pub mod core;
pub mod export;
pub mod grading;
pub mod stats;
