//! bndl - declarative installer bundles
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Overview
//!
//! `bndl` compiles a declarative multi-package bundle description into
//! a single self-contained installer artifact, unpacks built
//! artifacts, and runs the packaged chain against the local machine.
//!
//! # Architecture
//!
//! - **Bind pipeline**: `resolve → validate → link → bind → write`,
//!   each stage appending to a shared diagnostics collector so one
//!   build reports every failure.
//! - **Engine phases**: `detect → plan → execute` enforced by data
//!   dependency; rollback is scoped to the chain's boundaries.
//! - **Newtypes**: `PackageId`, `PayloadId`, `BoundaryId`, and
//!   `PayloadHash` keep the reference namespaces apart.

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub use bndl_core::engine::Intent;

#[derive(Debug, Parser)]
#[command(name = "bndl")]
#[command(author, version, about = "bndl - declarative installer bundles")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compile bundle sources into an installer artifact
    Build {
        /// Bundle source files; the first owns the identity and chain,
        /// later files contribute fragment definitions
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Additional directories searched for payload source files
        #[arg(short = 'b', long = "bindpath")]
        bind_paths: Vec<PathBuf>,
        /// Scratch directory for intermediate files
        #[arg(long)]
        intermediate_folder: Option<PathBuf>,
        /// Output artifact path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Unpack a built artifact into its payloads
    Extract {
        /// The bundle artifact
        bundle: PathBuf,
        /// Destination for bootstrapper-application payloads
        #[arg(long)]
        ba_folder: PathBuf,
        /// Destination for package payloads
        #[arg(long)]
        extract_folder: PathBuf,
    },
    /// Query a built artifact's documents without unpacking it
    Inspect {
        /// The bundle artifact
        bundle: PathBuf,
        /// Path selector (`Chain/MsiPackage`, `Payload[Id='x']`, ...)
        #[arg(long, default_value = "Chain")]
        selector: String,
        /// Query the bootstrapper-application data namespace instead
        /// of the manifest
        #[arg(long)]
        ba_data: bool,
    },
    /// Run the packaged chain against the local machine
    Apply {
        /// The bundle artifact
        bundle: PathBuf,
        /// What to do with the chain
        #[arg(long, value_enum, default_value_t = IntentArg::Install)]
        intent: IntentArg,
        /// Print the plan without dispatching anything
        #[arg(long)]
        dry_run: bool,
        /// Installed-state records (TOML) consulted during detection
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// CLI surface of the engine intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IntentArg {
    Install,
    Uninstall,
    Repair,
}

impl From<IntentArg> for Intent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Install => Intent::Install,
            IntentArg::Uninstall => Intent::Uninstall,
            IntentArg::Repair => Intent::Repair,
        }
    }
}
