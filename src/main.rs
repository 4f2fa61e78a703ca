//! unitfleet - manage systemd services on remote hosts over SSH
//!
//! This is the main entry point for the unitfleet CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unitfleet::config::{Config, LoggingConfig};
use unitfleet::error::Error;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration before logging so the configured level applies
    let (config, load_error) = match Config::load(cli.config.as_ref()) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(cli.verbosity(), &config.logging);

    let mut ctx = CommandContext::new(&cli, config);
    if let Some(e) = load_error {
        ctx.output
            .warning(&format!("Failed to load config, using defaults: {:#}", e));
    }
    if ctx.verbosity >= 2 {
        ctx.output.debug(&format!("unitfleet v{}", VERSION));
    }

    let exit_code = match run(&cli, &mut ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            e.downcast_ref::<Error>().map_or(1, Error::exit_code)
        }
    };

    ctx.output.flush();
    std::process::exit(exit_code);
}

/// Dispatch the parsed subcommand
async fn run(cli: &Cli, ctx: &mut CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Render(args) => args.execute(ctx).await,
        Commands::Cron(args) => args.execute(ctx).await,
        Commands::Templates(args) => args.execute(ctx).await,
        Commands::Test(args) => args.execute(ctx).await,
        Commands::Info(args) => args.execute(ctx).await,
        Commands::Units(args) => args.execute(ctx).await,
        Commands::Control(args) => args.execute(ctx).await,
        Commands::Logs(args) => args.execute(ctx).await,
        Commands::Validate(args) => args.execute(ctx).await,
        Commands::Deploy(args) => args.execute(ctx).await,
        Commands::Remove(args) => args.execute(ctx).await,
        Commands::Override(args) => args.execute(ctx).await,
    }
}

/// Initialize logging based on verbosity level and the logging config.
///
/// Logs go to stderr so JSON output on stdout stays parseable.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let level = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
