//! Shared types and wire format for bndl bundles.
//!
//! This crate defines the authored source model (TOML), the bound
//! binary manifest model (postcard), and the bootstrapper-application
//! data document, plus the identifier, version, and digest newtypes
//! shared by the bind pipeline and the runtime engine.

pub mod badata;
pub mod hash;
pub mod ids;
pub mod manifest;
pub mod source;
pub mod version;

// Re-exports
pub use badata::*;
pub use hash::*;
pub use ids::*;
pub use manifest::*;
pub use source::*;
pub use version::*;

/// Magic bytes at the start of every bound document (manifest and
/// bootstrapper-application data).
pub const DOCUMENT_MAGIC: [u8; 4] = *b"BNDL";

/// Version of the bound document wire format. Bumped on any breaking
/// change to the postcard record layout.
pub const FORMAT_VERSION: u16 = 1;
