//! CLI command implementations.

pub mod apply;
pub mod build;
pub mod completions;
pub mod extract;
pub mod inspect;
