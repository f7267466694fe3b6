//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::Cli;

/// Write completions for the given shell to stdout.
pub fn completions(shell: Shell) {
    let mut command = Cli::command();
    generate(shell, &mut command, "bndl", &mut std::io::stdout());
}
