//! Stackform - infrastructure stacks as typed Rust
//!
//! This is the main entry point for the Stackform CLI.

mod cli;
mod config;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use config::{Config, LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config = Config::load(cli.config.as_ref())?;

    init_logging(cli.verbosity(), &config.logging);

    if cli.verbosity() >= 2 {
        eprintln!("Stackform v{VERSION} (stackform {})", stackform::VERSION);
    }

    let mut ctx = CommandContext::new(&cli, config);

    let exit_code = match &cli.command {
        Commands::Synth(args) => args.execute(&mut ctx)?,
        Commands::Diff(args) => args.execute(&mut ctx)?,
        Commands::Deploy(args) => args.execute(&mut ctx)?,
        Commands::Destroy(args) => args.execute(&mut ctx)?,
        Commands::Graph(args) => args.execute(&mut ctx)?,
        Commands::Check(args) => args.execute(&mut ctx)?,
        Commands::List(args) => args.execute(&mut ctx)?,
        Commands::Completions(args) => args.execute(&mut ctx)?,
    };

    ctx.output.flush();
    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
///
/// `RUST_LOG` wins over `-v`, which wins over the configured level.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let (text, json) = match logging.format {
        LogFormat::Text => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 3),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION, stackform::VERSION);
    }
}
