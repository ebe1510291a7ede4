use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use nodeview::config::{self, default_config_path, Config};
use nodeview::genesis::GenesisModel;
use nodeview::log_buffer::{LogBuffer, LogBufferLayer};
use nodeview::metrics::MetricsClient;
use nodeview::peers::{
    DisabledGeoLocator, DiscoveryConfig, GeoLocator, HttpGeoLocator, LatencyProber,
    PeerDiscovery, TcpInfoProbe,
};
use nodeview::process::{ProcNetConnections, ProcessMonitor, ProcessSelector};
use nodeview::tasks::{self, Pollers, TaskScheduler};
use nodeview::{ui, version, AppError, AppState};

#[derive(Parser, Debug)]
#[command(name = "nodeview")]
#[command(about = "Terminal dashboard for a Cardano node", long_about = None)]
#[command(version = version::VERSION)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    /// Write a default config file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        let path = args.config.clone().unwrap_or_else(default_config_path);
        match Config::default().save_to_file(&path) {
            Ok(_) => {
                println!("✅ Generated default config at: {}", path.display());
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let log_buffer = Arc::new(LogBuffer::new(config.app.log_buffer_size));
    let guard = setup_logging(&config.logging, args.verbose, log_buffer.clone());

    let result = run(config, log_buffer).await;
    drop(guard);

    if let Err(e) = result {
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config, log_buffer: Arc<LogBuffer>) -> Result<(), AppError> {
    let genesis = GenesisModel::resolve(&config)?;
    info!(
        "🚀 nodeview {} watching {} on {} (magic {})",
        version::version_string(),
        config.node.binary,
        genesis.network,
        genesis.network_magic
    );

    let geo: Arc<dyn GeoLocator> = if config.app.geoip {
        Arc::new(HttpGeoLocator::new()?)
    } else {
        Arc::new(DisabledGeoLocator)
    };
    let prober = LatencyProber::new(Arc::new(TcpInfoProbe::default()), geo);
    let discovery = PeerDiscovery::new(DiscoveryConfig::from_config(&config));

    let pollers = Pollers {
        metrics: Arc::new(MetricsClient::new(&config.prometheus)?),
        process: Arc::new(ProcessMonitor::new(ProcessSelector::from_config(&config.node)?)),
        connections: Arc::new(ProcNetConnections::new()),
    };
    info!("✓ Metrics endpoint: {}", pollers.metrics.url());

    let state = Arc::new(AppState::new(config, genesis, discovery, prober, log_buffer));

    let mut scheduler = TaskScheduler::new();
    tasks::spawn_pollers(&mut scheduler, state.clone(), pollers);
    info!("✓ Started {} background tasks", scheduler.len());

    let result = ui::run(state).await;
    scheduler.shutdown().await;
    result
}

/// Logs go to the in-dashboard buffer and, when configured, to a daily rolling file
fn setup_logging(
    config: &config::LoggingConfig,
    verbose: bool,
    buffer: Arc<LogBuffer>,
) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Get hostname - shorten to first part before dot
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    let mut guard = None;
    let file_layer = config.file.as_ref().map(|file| {
        let path = PathBuf::from(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "nodeview.log".to_string());

        let (writer, worker) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        guard = Some(worker);

        match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_thread_ids(false)
                .boxed(),
            _ => fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_timer(CustomTimer {
                    hostname: short_hostname,
                })
                .compact()
                .boxed(),
        }
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(LogBufferLayer::new(buffer))
        .with(filter)
        .init();

    guard
}

// Custom timer that shows UTC time and hostname
struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        use chrono::Utc;
        let now = Utc::now();

        // Format: "YYYY-MM-DD HH:MM:SS.mmm [hostname]"
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
