use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paygate::application::consumer::QueueConsumer;
use paygate::application::service::PaymentService;
use paygate::config::{ConsumerConfig, SimulationConfig};
use paygate::domain::ports::PaymentStoreBox;
use paygate::error::ErrorResponse;
use paygate::infrastructure::broker::InMemoryBroker;
use paygate::infrastructure::in_memory::InMemoryPaymentStore;
#[cfg(feature = "storage-rocksdb")]
use paygate::infrastructure::rocksdb::RocksDbPaymentStore;
use paygate::interfaces::csv::payment_writer::PaymentWriter;
use paygate::interfaces::csv::request_reader::PaymentRequestReader;
use paygate::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment requests CSV file (amount,currency,reference)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter, e.g. `info` or `paygate=debug,warn`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    #[command(flatten)]
    consumer: ConsumerConfig,

    #[command(flatten)]
    simulation: SimulationConfig,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreBox> {
    match db_path {
        Some(path) => {
            let store = RocksDbPaymentStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "Using RocksDB storage");
            Ok(Box::new(store))
        }
        None => Ok(Box::new(InMemoryPaymentStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<PaymentStoreBox> {
    if db_path.is_some() {
        warn!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Box::new(InMemoryPaymentStore::new()))
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level);

    let store = open_store(cli.db_path)?;
    let broker = InMemoryBroker::new();
    let publisher = broker
        .publisher(&cli.consumer.queue)
        .await
        .into_diagnostic()?;
    let service = Arc::new(PaymentService::new(
        store,
        Box::new(publisher),
        Box::new(cli.simulation.processor()),
    ));

    // Intake
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = PaymentRequestReader::new(file);
    for request in reader.requests() {
        match request {
            Ok(request) => {
                if let Err(e) = service.create_payment(request).await {
                    let response = ErrorResponse::from(&e);
                    warn!(
                        code = response.code,
                        message = %response.message,
                        description = %response.description,
                        "Error creating payment"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading payment request");
            }
        }
    }

    // Processing
    let consumer = QueueConsumer::connect(Arc::new(broker.clone()), service.clone(), &cli.consumer)
        .await
        .into_diagnostic()?;
    let shutdown = CancellationToken::new();
    let pool = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let result = consumer.start(shutdown).await;
            (consumer, result)
        }
    });

    tokio::select! {
        drained = broker.wait_until_drained(&cli.consumer.queue) => {
            drained.into_diagnostic()?;
            info!("Queue drained");
        }
        signal = shutdown_signal() => {
            let signal = signal.into_diagnostic()?;
            info!(signal, "Interrupted, waiting for in-flight tasks");
        }
    }
    shutdown.cancel();

    let (consumer, result) = pool.await.into_diagnostic()?;
    result.into_diagnostic()?;

    let stats = broker.stats(consumer.queue()).into_diagnostic()?;
    if stats.dead_lettered > 0 {
        warn!(
            dead_lettered = stats.dead_lettered,
            "Some processing tasks were dead-lettered"
        );
    }
    consumer.close().await.into_diagnostic()?;

    // Output final state
    let payments = service.list_payments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments).into_diagnostic()?;

    Ok(())
}
