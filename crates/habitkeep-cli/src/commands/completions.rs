use std::fs::File;
use std::io;
use std::path::Path;

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
        }
    }
}

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_string();

    if let Some(path) = output_path {
        let mut file = File::create(path)?;
        generate(Shell::from(shell), &mut command, bin_name, &mut file);
        println!("{}", path.display());
    } else {
        generate(Shell::from(shell), &mut command, bin_name, &mut io::stdout());
    }
    Ok(())
}
