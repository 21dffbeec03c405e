use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, routing::post, Router};
use futures::StreamExt;
use lapin::options::BasicNackOptions;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::mpsc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use imgmill::app_state::AppState;
use imgmill::config::AppConfig;
use imgmill::models::job::ImageProcessJobData;
use imgmill::routes;
use imgmill::services::dispatcher::{self, Job};
use imgmill::services::offload::OffloadClient;
use imgmill::services::queue::ImageQueue;
use imgmill::services::storage::BlobStore;
use imgmill::services::workers::{WorkerContext, WorkerPool};

/// Window allowed for the whole graceful-shutdown sequence.
const SHUTDOWN_WINDOW: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // Load configuration from environment
    let config = AppConfig::from_env().expect("failed to load configuration from environment");

    init_tracing(&config);
    tracing::info!("initializing imgmill server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("image_jobs_total", "Total image jobs dispatched");
    metrics::describe_counter!(
        "image_job_errors_total",
        "Total rendition errors across jobs"
    );
    metrics::describe_counter!("renditions_total", "Renditions computed and stored");
    metrics::describe_counter!(
        "renditions_skipped_total",
        "Renditions skipped because the destination key already existed"
    );
    metrics::describe_counter!("images_uploaded_total", "Original images uploaded");
    metrics::describe_histogram!("image_job_seconds", "Time to process one image job");

    let storage = Arc::new(
        BlobStore::new(
            &config.cdn_bucket,
            &config.cdn_endpoint,
            &config.cdn_region,
            &config.cdn_key,
            &config.cdn_secret,
            &config.cdn_images_folder,
        )
        .expect("failed to initialize blob store"),
    );

    tracing::info!("connecting to rabbitmq");
    let publisher = Arc::new(
        ImageQueue::publisher(&config.rabbitmq_url)
            .await
            .expect("failed to create queue publisher"),
    );
    let consumer_queue = Arc::new(
        ImageQueue::consumer(&config.rabbitmq_url, config.dev)
            .await
            .expect("failed to create queue consumer"),
    );

    let offload = OffloadClient::from_config(&config).map(Arc::new);
    if offload.is_some() {
        tracing::info!("offload mode enabled");
    }

    let pool = Arc::new(WorkerPool::start(
        config.worker_count(),
        WorkerContext {
            storage: Arc::clone(&storage),
            http: reqwest::Client::new(),
            images_folder: config.cdn_images_folder.clone(),
            offload,
        },
    ));

    let (jobs_tx, jobs_rx) = mpsc::channel(1);
    let dispatcher = dispatcher::spawn(
        jobs_rx,
        Arc::clone(&pool),
        Arc::clone(&storage),
        config.cdn_images_folder.clone(),
    );

    let consumer = tokio::spawn(consume_jobs(Arc::clone(&consumer_queue), jobs_tx.clone()));

    let bind_addr = config.bind_addr();
    let state = AppState::new(Arc::new(config), Arc::clone(&publisher), jobs_tx);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/job", post(routes::jobs::submit_job))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // HTTP is down. Close the queue so the consumer loop ends, drain the
    // dispatcher, then let every worker finish its in-flight task.
    consumer_queue.close().await;
    let _ = consumer.await;
    let _ = dispatcher.await;
    pool.shutdown().await;
    publisher.close().await;

    tracing::info!("shutdown complete");
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_deref().unwrap_or("info")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.log_trace)
        .with_line_number(config.log_trace);

    if config.log_format.as_deref() == Some("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Feed queue deliveries to the dispatcher. A payload that does not parse is
/// dropped without requeue; retrying it can never succeed.
async fn consume_jobs(queue: Arc<ImageQueue>, jobs: mpsc::Sender<Job>) {
    let mut consumer = match queue.consume().await {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(error = %e, "could not start queue consumer");
            return;
        }
    };

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::error!(error = %e, "queue consumer error");
                continue;
            }
        };

        match serde_json::from_slice::<ImageProcessJobData>(&delivery.data) {
            Ok(data) => {
                if jobs.send(Job::queued(data, delivery)).await.is_err() {
                    tracing::warn!("dispatcher stopped, ending consumer");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "could not deserialize job payload");
                let options = BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                };
                if let Err(e) = delivery.nack(options).await {
                    tracing::error!(error = %e, "could not nack malformed delivery");
                }
            }
        }
    }

    tracing::warn!("closing listener for jobs");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = quit.recv() => {}
        _ = terminate.recv() => {}
    }

    tracing::warn!("received termination signal, shutting down gracefully");

    // Hard deadline for the drain that follows.
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_WINDOW).await;
        tracing::error!("graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
