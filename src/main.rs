use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approval_daemon::api::{self, DashboardState};
use approval_daemon::config::{self, Config};
use approval_daemon::errors::ApprovalError;
use approval_daemon::ipc::{DaemonClient, IpcServer};
use approval_daemon::jobs;
use approval_daemon::models::approval::ApprovalPayload;
use approval_daemon::models::session::Session;
use approval_daemon::notification::ntfy::{NtfyClient, NtfyNotifier};
use approval_daemon::queue::ApprovalQueue;
use approval_daemon::setup::{self, SetupServer};
use approval_daemon::store::bootstrap::{self, BootstrapConfig};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { reset }) => {
            if reset {
                reset_config(&cfg)?;
            }
            run_daemon(cfg).await
        }
        Some(cli::Commands::Status) => print_status(&cfg).await,
        Some(cli::Commands::Reset) => reset_config(&cfg),
        Some(cli::Commands::Request {
            to,
            subject,
            body,
            draft_id,
        }) => {
            let payload = ApprovalPayload {
                draft_id,
                to,
                subject,
                body,
            };
            request_approval(&cfg, &payload).await
        }
        Some(cli::Commands::Setup) => {
            let broker = broker_client(&cfg)?;
            let config = bootstrap::load_or_create(&cfg.bootstrap_path())?;
            run_setup(&cfg, &broker, config).await.map(|_| ())
        }
        None => run_daemon(cfg).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "approval-daemon"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "approval_daemon=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

fn broker_client(cfg: &Config) -> anyhow::Result<NtfyClient> {
    NtfyClient::new(&cfg.ntfy_base_url, cfg.ntfy_token.clone())
}

async fn run_daemon(cfg: Config) -> anyhow::Result<()> {
    let broker = broker_client(&cfg)?;
    let boot = ensure_setup(&cfg, &broker).await?;

    let notifier = Arc::new(NtfyNotifier::new(broker.clone(), boot.ntfy_topic.clone()));
    let queue = Arc::new(ApprovalQueue::new(notifier));

    let ipc = IpcServer::bind(&cfg.socket_path, queue.clone())?;

    jobs::broker_poll::spawn(
        queue.clone(),
        broker.clone(),
        boot.ntfy_topic.clone(),
        cfg.poll_interval,
    );
    tracing::info!(every = ?cfg.poll_interval, "broker poll job started");

    let dashboard_url = if cfg.dashboard_enabled() {
        Some(start_dashboard(&cfg, queue.clone()).await?)
    } else {
        tracing::info!("dashboard disabled");
        None
    };

    println!("═══════════════════════════════════════════════════════════════");
    println!("  Approval daemon running");
    println!("  Socket:      {}", cfg.socket_path.display());
    println!("  Subscribe:   {}", broker.topic_url(&boot.ntfy_topic));
    if let Some(url) = &dashboard_url {
        println!("  Dashboard:   {}", url);
    }
    println!("═══════════════════════════════════════════════════════════════");

    ipc.run_until(shutdown_signal()).await;
    tracing::info!("approval daemon stopped");
    Ok(())
}

/// Load (or create) the bootstrap config and run setup if it never finished.
async fn ensure_setup(cfg: &Config, broker: &NtfyClient) -> anyhow::Result<BootstrapConfig> {
    let config = bootstrap::load_or_create(&cfg.bootstrap_path())?;
    if config.setup_complete {
        return Ok(config);
    }
    run_setup(cfg, broker, config).await
}

async fn run_setup(
    cfg: &Config,
    broker: &NtfyClient,
    config: BootstrapConfig,
) -> anyhow::Result<BootstrapConfig> {
    let server = SetupServer::bind(broker.clone(), config, cfg.bootstrap_path()).await?;
    let addr = server.local_addr()?;
    tracing::info!(%addr, "setup server listening");
    setup::open_browser(&format!("http://{}", addr));
    let config = server.run().await?;
    if !config.setup_complete {
        anyhow::bail!("setup ended before it was completed");
    }
    Ok(config)
}

async fn start_dashboard(cfg: &Config, queue: Arc<ApprovalQueue>) -> anyhow::Result<String> {
    let session = Arc::new(Session::new());
    jobs::history::spawn(&queue, session.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], cfg.dashboard_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind dashboard on {}", addr))?;
    let url = format!("http://{}/outbox/{}", addr, session.id());

    let app = api::dashboard_router(Arc::new(DashboardState { queue, session }));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dashboard server error");
        }
    });
    tracing::info!(%addr, "dashboard listening");
    Ok(url)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn reset_config(cfg: &Config) -> anyhow::Result<()> {
    let path = cfg.bootstrap_path();
    if bootstrap::reset(&path)? {
        println!("Config reset. Run the daemon again to re-run setup.");
    } else {
        println!("No config found at {}", path.display());
    }
    Ok(())
}

async fn print_status(cfg: &Config) -> anyhow::Result<()> {
    let client = DaemonClient::new(cfg.socket_path.clone());
    match client.status().await {
        Ok(status) => {
            println!("Daemon status: {}", status);
            Ok(())
        }
        Err(e @ ApprovalError::DaemonUnreachable(_)) => {
            println!("{}", e);
            Err(e.into())
        }
        Err(e) => Err(e).context("status request failed"),
    }
}

async fn request_approval(cfg: &Config, payload: &ApprovalPayload) -> anyhow::Result<()> {
    let client = DaemonClient::new(cfg.socket_path.clone());
    println!("Waiting for approval of email to {}...", payload.to);
    client.queue_email(payload).await?;
    println!("Approved.");
    Ok(())
}
