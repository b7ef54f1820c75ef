use anyhow::Result;
use camwarden::config::{self, Config};
use camwarden::db::{DatabaseService, Stores};
use camwarden::drivers::{DriverContext, DriverRegistry};
use camwarden::ingest::listener::{self, Bind};
use camwarden::messaging::broker::create_message_broker;
use camwarden::storage::MediaFiles;
use camwarden::tasks::{self, CameraLocks, TaskContext, TaskSettings};
use camwarden::worker::{run_with_reconnect, HealthScheduler};
use camwarden::{FtpServer, IngestService, JobQueue, LocalQueue, SmtpServer, Worker};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "camwarden")]
#[command(about = "Camera alarm backend: upload front-ends and motion worker")]
#[command(version)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mail upload front-end
    Smtp(ListenArgs),

    /// Run the FTP upload front-end
    Ftp(ListenArgs),

    /// Run the job worker
    Worker,

    /// Run both front-ends and the worker in one process on an in-process queue
    Standalone,

    /// Apply database migrations and exit
    Migrate,
}

#[derive(Args)]
struct ListenArgs {
    /// Address to listen on
    #[arg(long, conflicts_with = "fd")]
    addr: Option<String>,

    /// Port to listen on
    #[arg(short, long, conflicts_with = "fd")]
    port: Option<u16>,

    /// Inherited listening socket
    #[arg(long)]
    fd: Option<i32>,
}

impl ListenArgs {
    fn bind(&self, address: &str, port: u16) -> Bind {
        match self.fd {
            #[cfg(unix)]
            Some(fd) => Bind::Fd(fd),
            _ => Bind::Address {
                address: self.addr.clone().unwrap_or_else(|| address.to_string()),
                port: self.port.unwrap_or(port),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    info!("Starting camwarden {}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    match cli.command {
        Commands::Worker => {
            if config.worker.reset_recording_on_start {
                reset_abandoned_recordings(&config).await;
            }
            let delay = Duration::from_secs(config.worker.reconnect_delay_secs);
            let grace = Duration::from_secs(config.worker.shutdown_grace_secs);
            let (config, token) = (&config, &shutdown);
            run_with_reconnect(
                move || worker_session(config, token.clone()),
                delay,
                shutdown.clone(),
                grace,
            )
            .await
        }
        Commands::Standalone => standalone(&config, shutdown).await,
        Commands::Smtp(args) => until_shutdown(&shutdown, serve_smtp(&args, &config)).await,
        Commands::Ftp(args) => until_shutdown(&shutdown, serve_ftp(&args, &config)).await,
        Commands::Migrate => {
            let database = DatabaseService::new(&config.database).await?;
            database.run_migrations().await
        }
    }
}

async fn until_shutdown(
    shutdown: &CancellationToken,
    service: impl Future<Output = Result<()>>,
) -> Result<()> {
    tokio::select! {
        result = service => result,
        _ = shutdown.cancelled() => Ok(()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

async fn serve_smtp(args: &ListenArgs, config: &Config) -> Result<()> {
    let service = ingest_service(config, broker(config).await?).await?;
    let listener = listener::bind(&args.bind(&config.smtp.address, config.smtp.port)).await?;
    Arc::new(SmtpServer::new(service, config.smtp.clone()))
        .serve(listener)
        .await
}

async fn serve_ftp(args: &ListenArgs, config: &Config) -> Result<()> {
    let service = ingest_service(config, broker(config).await?).await?;
    let listener = listener::bind(&args.bind(&config.ftp.address, config.ftp.port)).await?;
    Arc::new(FtpServer::new(service, config.ftp.clone()))
        .serve(listener)
        .await
}

/// A previous worker may have died mid-recording; failures only get logged
async fn reset_abandoned_recordings(config: &Config) {
    let result = match DatabaseService::new(&config.database).await {
        Ok(database) => tasks::reset_abandoned_recordings(database.stores().cameras.as_ref()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        error!("Failed to reset abandoned recordings: {:#}", e);
    }
}

async fn broker(config: &Config) -> Result<Arc<dyn JobQueue>> {
    let prefetch = u16::try_from(config.worker.concurrency).unwrap_or(u16::MAX);
    let broker: Arc<dyn JobQueue> =
        create_message_broker(config.message_broker.clone(), prefetch).await?;
    Ok(broker)
}

async fn ingest_service(config: &Config, queue: Arc<dyn JobQueue>) -> Result<IngestService> {
    let database = DatabaseService::new(&config.database).await?;
    Ok(IngestService::new(
        database.stores(),
        MediaFiles::new(&config.storage.media_path),
        queue,
    ))
}

/// One connection to the broker: consume until the stream ends or shutdown
async fn worker_session(config: &Config, shutdown: CancellationToken) -> Result<()> {
    let database = DatabaseService::new(&config.database).await?;
    let queue = broker(config).await?;
    run_worker(config, database.stores(), queue, shutdown).await
}

async fn run_worker(
    config: &Config,
    stores: Stores,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
) -> Result<()> {
    let drivers = DriverRegistry::init(DriverContext {
        media: stores.media.clone(),
        files: MediaFiles::new(&config.storage.media_path),
        config: config.drivers.clone(),
    });
    let context = TaskContext {
        stores: stores.clone(),
        queue: queue.clone(),
        drivers: Arc::new(drivers),
        settings: TaskSettings::from(&config.tasks),
        locks: CameraLocks::new(),
        shutdown: shutdown.clone(),
    };

    let mut worker = Worker::new(queue.clone(), config.worker.concurrency);
    tasks::register_all(&mut worker, context);

    let scheduler = (config.worker.health_interval_secs > 0).then(|| {
        Arc::new(HealthScheduler::new(
            stores.cameras.clone(),
            queue,
            Duration::from_secs(config.worker.health_interval_secs),
        ))
        .start()
    });

    let result = worker.work(shutdown).await;
    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    result
}

async fn standalone(config: &Config, shutdown: CancellationToken) -> Result<()> {
    let database = DatabaseService::new(&config.database).await?;
    if config.worker.reset_recording_on_start {
        tasks::reset_abandoned_recordings(database.stores().cameras.as_ref()).await?;
    }
    let queue: Arc<dyn JobQueue> = Arc::new(LocalQueue::new());
    let service = IngestService::new(
        database.stores(),
        MediaFiles::new(&config.storage.media_path),
        queue.clone(),
    );

    let smtp_listener = listener::bind(&Bind::Address {
        address: config.smtp.address.clone(),
        port: config.smtp.port,
    })
    .await?;
    let ftp_listener = listener::bind(&Bind::Address {
        address: config.ftp.address.clone(),
        port: config.ftp.port,
    })
    .await?;

    let smtp = Arc::new(SmtpServer::new(service.clone(), config.smtp.clone()));
    let ftp = Arc::new(FtpServer::new(service, config.ftp.clone()));

    let servers = until_shutdown(&shutdown, async {
        tokio::try_join!(smtp.serve(smtp_listener), ftp.serve(ftp_listener)).map(|_| ())
    });
    let grace = Duration::from_secs(config.worker.shutdown_grace_secs);
    let worker = async {
        let running = run_worker(config, database.stores(), queue, shutdown.clone());
        tokio::pin!(running);
        tokio::select! {
            result = &mut running => result,
            _ = async { shutdown.cancelled().await; tokio::time::sleep(grace).await } => {
                error!("Running jobs did not finish within {:?}", grace);
                Ok(())
            }
        }
    };

    tokio::try_join!(servers, worker)?;
    Ok(())
}
