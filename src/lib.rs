//! Code execution and visual capture pipeline

pub mod core;
pub mod engine;
pub mod jobs;
pub mod redis_manager;
