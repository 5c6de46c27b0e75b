use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use blob_image_optimizer::handlers::{self, JobState};
use blob_image_optimizer::scheduler::spawn_scheduler;
use blob_image_optimizer::store::FsStore;
use blob_image_optimizer::{
    AlwaysReachable, Compressor, Config, HttpProbe, Identity, OptimizationDriver, ReachabilityProbe, RunStatistics,
};

#[derive(Parser)]
#[command(name = "blob-image-optimizer")]
#[command(version, about = "Scheduled JPEG/PNG re-encoder for a content tree", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $BLOB_OPTIMIZER_CONFIG or ./config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a sample configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.generate_config {
        Config::generate_sample_config(&path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        println!("Wrote sample configuration to {}", path.display());
        return Ok(());
    }

    // Load configuration first
    let config = Config::load_with_path(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.logging.level)).init();

    info!("Starting Blob Image Optimizer v{}", env!("CARGO_PKG_VERSION"));
    info!("Content root: {:?} served at {}", config.job.root, config.job.public_base_url);
    info!(
        "Compression quality: {}, JPEG backend: {}",
        config.compression.quality,
        config.compression.jpeg_backend.as_str()
    );

    // The blocking HTTP client has to be built outside the async runtime.
    let probe: Arc<dyn ReachabilityProbe> = if config.probe.enabled {
        let probe = HttpProbe::new(config.probe_timeout())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Arc::new(probe)
    } else {
        warn!("Reachability probe disabled, every asset is treated as reachable");
        Arc::new(AlwaysReachable)
    };

    let store = Arc::new(FsStore::new(config.job.root.clone(), config.job.public_base_url.clone()));
    let stats = Arc::new(RunStatistics::new());
    let driver = Arc::new(OptimizationDriver::new(
        config.job_settings(),
        Identity::new(config.job.principal.clone()),
        store.clone(),
        store,
        probe,
        Compressor::new(config.compression_config(), stats),
    ));

    actix_web::rt::System::new().block_on(serve(config, driver))
}

async fn serve(config: Config, driver: Arc<OptimizationDriver>) -> std::io::Result<()> {
    let scheduler = spawn_scheduler(Arc::clone(&driver), config.interval(), config.job.run_on_startup);

    let bind_address = config.bind_address();
    let worker_threads = config.server.worker_threads;
    info!("Admin API listening on http://{}", bind_address);

    let state = JobState::new(driver);
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(handlers::configure)
    });

    if let Some(workers) = worker_threads {
        server = server.workers(workers);
    }

    let result = server.bind(&bind_address)?.run().await;
    scheduler.abort();
    result
}
