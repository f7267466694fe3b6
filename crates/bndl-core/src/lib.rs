//! Core library for bndl.
//!
//! Owns the bind pipeline (payload resolution, package validation,
//! chain linking, manifest binding, container writing), the inverse
//! extraction path, and the runtime chain-execution engine. The
//! authored source model and the bound manifest types come from
//! `bndl-schema`; this crate turns one into the other and executes
//! the result.

pub mod bind;
pub mod container;
pub mod diag;
pub mod engine;
pub mod extract;
pub mod link;
pub mod resolve;
pub mod validate;

pub use bind::{ATTACHED_CONTAINER, BoundBundle, UX_CONTAINER, bind};
pub use container::{WriteError, write_bundle};
pub use diag::{Diagnostics, Message, Severity, codes};
pub use extract::{ExtractError, ExtractResult, extract_bundle};
pub use link::{DEFAULT_BOUNDARY, LinkedChain, link_chain};
pub use resolve::{BindPaths, ResolvedPayload, resolve_payload};
pub use validate::{ValidatedPackage, validate_packages};
