use anyhow::{Context, Result};
use clap::Parser;
use clipswap_rs::{
    cli::{self, Cli, Command},
    logging::TextPipelineFormatter,
    ClipswapApp, ConfigManager,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipswap=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(TextPipelineFormatter::new()),
        )
        .init();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::load_from(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config_manager).await,
        Command::Apply(args) => cli::apply(&config_manager, &args),
        Command::Diff(args) => cli::diff(&config_manager, &args),
        Command::Profiles => cli::profiles(&config_manager),
        Command::Enable { name } => cli::set_enabled(&config_manager, &name, true),
        Command::Disable { name } => cli::set_enabled(&config_manager, &name, false),
        Command::AddRule(args) => cli::add_rule(&config_manager, &args),
        Command::Secret(command) => cli::secret(&config_manager, &command),
        Command::Check => cli::check(&config_manager),
    }
}

async fn run_daemon(config_manager: ConfigManager) -> Result<()> {
    info!("🚀 clipswap-rs starting up!");
    info!("{}", "=".repeat(50));

    config_manager.start_watching();
    let config = config_manager.get();
    info!("✅ Configuration loaded from {}", config_manager.config_path().display());
    info!(
        "   Profiles: {} ({} enabled)",
        config.profiles.len(),
        config.profiles.iter().filter(|profile| profile.enabled).count()
    );
    info!("   Temporary clipboard: {}", config.temporary_clipboard);
    info!("   Automatic revert: {}", config.automatic_revert);
    match &config.revert_shortcut {
        Some(shortcut) => info!("   Revert shortcut: {}", shortcut),
        None => info!("   Revert shortcut: disabled"),
    }
    if let Some(shortcut) = &config.diff_shortcut {
        info!("   Diff shortcut: {}", shortcut);
    }

    let app = ClipswapApp::new(config_manager)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to set up SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = signal::ctrl_c() => info!("Received SIGINT (Ctrl+C)"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });

    app.run(shutdown_rx).await?;

    info!("🛑 clipswap-rs stopped");
    Ok(())
}
