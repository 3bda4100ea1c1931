//! Migration System
//!
//! Script discovery on disk, the tracking table, and the engine that ties
//! them together.

pub mod catalog;
pub mod definitions;
pub mod engine;
pub mod rollback;
pub mod tracking;

pub use catalog::*;
pub use definitions::*;
pub use engine::*;
pub use tracking::*;
