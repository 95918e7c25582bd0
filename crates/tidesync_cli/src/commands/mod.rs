//! CLI command implementations.

pub mod items;
pub mod queue;
pub mod simulate;
