//! Shell completions module for Stackform
//!
//! Provides shell completion scripts for bash, zsh, fish, powershell, and elvish.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use std::io;

use crate::cli::commands::CommandContext;
use crate::cli::Cli;

/// Arguments for the completions command
#[derive(Parser, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Print installation instructions instead of the script
    #[arg(long)]
    pub instructions: bool,
}

impl CompletionsArgs {
    /// Execute the completions command
    pub fn execute(&self, _ctx: &mut CommandContext) -> Result<i32> {
        if self.instructions {
            print_installation_instructions(self.shell);
        } else {
            generate_completions(self.shell);
        }
        Ok(0)
    }
}

/// Generate shell completions and write to stdout
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "stackform", &mut io::stdout());
}

/// Print installation instructions for completions
pub fn print_installation_instructions(shell: Shell) {
    match shell {
        Shell::Bash => {
            println!("# Add to ~/.bashrc:");
            println!("eval \"$(stackform completions bash)\"");
        }
        Shell::Zsh => {
            println!("# Save into a directory on your fpath:");
            println!("stackform completions zsh > ~/.zsh/completions/_stackform");
        }
        Shell::Fish => {
            println!("stackform completions fish > ~/.config/fish/completions/stackform.fish");
        }
        Shell::PowerShell => {
            println!("# Add to your PowerShell profile:");
            println!("Invoke-Expression (& stackform completions powershell | Out-String)");
        }
        Shell::Elvish => {
            println!("# Add to ~/.elvish/rc.elv:");
            println!("eval (stackform completions elvish | slurp)");
        }
        _ => {
            println!("# Pipe `stackform completions <shell>` into your shell's completion directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_mention_subcommands() {
        let mut buf = Vec::new();
        generate(Shell::Bash, &mut Cli::command(), "stackform", &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("stackform"));
        assert!(script.contains("synth"));
        assert!(script.contains("destroy"));
    }

    #[test]
    fn test_completions_args_parsing() {
        let args = CompletionsArgs::try_parse_from(["completions", "zsh"]).unwrap();
        assert_eq!(args.shell, Shell::Zsh);
        assert!(!args.instructions);
    }
}
