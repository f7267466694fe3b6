//! bndl - declarative installer bundles CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bndl_cli::cmd;
use bndl_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Build {
            sources,
            bind_paths,
            intermediate_folder,
            output,
        } => {
            let code = cmd::build::build(
                &sources,
                &bind_paths,
                intermediate_folder.as_deref(),
                &output,
                quiet,
            )?;
            if code != 0 {
                // The exit code is the numeric class of the most
                // severe error reported.
                std::process::exit(i32::try_from(code).unwrap_or(i32::MAX));
            }
            Ok(())
        }
        Commands::Extract {
            bundle,
            ba_folder,
            extract_folder,
        } => cmd::extract::extract(&bundle, &ba_folder, &extract_folder, quiet),
        Commands::Inspect {
            bundle,
            selector,
            ba_data,
        } => cmd::inspect::inspect(&bundle, &selector, ba_data),
        Commands::Apply {
            bundle,
            intent,
            dry_run,
            state,
        } => cmd::apply::apply(&bundle, intent.into(), dry_run, state.as_deref(), quiet).await,
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
