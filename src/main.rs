use anyhow::Context as _;
use clap::Parser;
use datatask::cli::handlers;
use datatask::cli::{Cli, Commands};
use datatask::config::selected_environment;
use datatask::Context;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let env = selected_environment(cli.env.as_deref());
    let context = Context::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let adapter = context.adapter(&env)?;
    tracing::debug!(environment = %env, kind = %adapter.kind(), "adapter ready");

    match cli.command {
        Commands::Setup { scope, force } => {
            handlers::handle_setup(&*adapter, scope.as_deref(), force)
        }
        Commands::Teardown { scope } => handlers::handle_teardown(&*adapter, scope.as_deref()),
        Commands::TeardownGlobal => handlers::handle_teardown_global(&*adapter),
        Commands::Reset { scope } => handlers::handle_reset(&*adapter, scope.as_deref()),
        Commands::Status { scope } => handlers::handle_status(&*adapter, scope.as_deref()),
        Commands::Exists { name } => handlers::handle_exists(&*adapter, &name),
        Commands::Mtime { name, json } => handlers::handle_mtime(&*adapter, &name, json),
        Commands::History { name, json } => handlers::handle_history(&*adapter, &name, json),
        Commands::Needed { name, prereqs } => handlers::handle_needed(&adapter, &name, &prereqs),
    }?;
    Ok(())
}
