use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use modemguard::cli::{parse_args, print_help};
use modemguard::config::Config;
use modemguard::executor::{CommandExecutor, ShellExecutor};
use modemguard::health;
use modemguard::model::HealthStatus;
use modemguard::orchestrator::Supervisor;
use modemguard::recovery_log::RecoveryLog;
use modemguard::tunnel::WireGuardProvider;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    if let Some(e) = &args.error {
        eprintln!("{}\n", e);
        print_help();
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("modemguard=info".parse()?),
        )
        .init();

    info!("ModemGuard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Modems: {} (prefix {})", config.modem_ids.join(", "), config.modem_id_prefix);
    info!(
        "  Thresholds: soft={} medium={} hard={} (max {} hard attempts)",
        config.thresholds.soft, config.thresholds.medium, config.thresholds.hard, config.max_hard_attempts
    );
    info!(
        "  WireGuard: {}",
        if config.wg_enabled { config.wg_interface.as_str() } else { "disabled" }
    );

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let log = match RecoveryLog::open(&config.log_path) {
        Ok(log) => log,
        Err(e) => {
            warn!("Recovery log unavailable ({:#}), keeping entries in memory only", e);
            RecoveryLog::in_memory()
        }
    };

    let config = Arc::new(config);
    let executor: Arc<dyn CommandExecutor> = Arc::new(ShellExecutor::new());
    let tunnel = Arc::new(WireGuardProvider::new(&config, executor.clone()));
    let supervisor = Supervisor::new(config.clone(), executor, tunnel, Arc::new(log));

    // Handle --configure-audio mode
    if let Some(modem_id) = args.configure_audio {
        if let Err(e) = config.check_modem_id(&modem_id) {
            error!("--configure-audio {}", e);
            std::process::exit(2);
        }
        let outcome = supervisor.recovery().audio().configure(&modem_id, supervisor.log()).await;
        info!(
            "Audio configuration for {}: family={} sent={} failed={} verified={:?}",
            outcome.modem_id, outcome.family, outcome.commands_sent, outcome.commands_failed, outcome.verified
        );
        if outcome.commands_failed > 0 || outcome.verified == Some(false) {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Run a single check and exit
    if args.once {
        info!("Running single check (--once mode)");
        let result = supervisor.force_check().await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        if result.overall >= HealthStatus::Critical {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Start status server if configured
    let health_cancel = CancellationToken::new();
    if let Some(port) = config.health_port {
        let supervisor = supervisor.clone();
        let cancel = health_cancel.clone();
        tokio::spawn(async move {
            health::run_health_server(port, supervisor, cancel).await;
        });
    }

    let handle = supervisor.start();
    if handle.is_none() {
        warn!("Periodic checks disabled (MONITOR_ENABLED=false); status endpoint stays up");
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    supervisor.stop();
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            error!("Scheduler task failed: {}", e);
        }
    }
    health_cancel.cancel();

    Ok(())
}
