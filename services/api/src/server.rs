use crate::cli::ServeArgs;
use crate::infra::{AppState, ChannelScheduler, InMemorySubscriptionRepository};
use crate::routes::with_provisioning_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tenant_cloud::config::AppConfig;
use tenant_cloud::error::AppError;
use tenant_cloud::provisioning::{
    BenchCommandRunner, BenchTenantInitializer, CertbotIssuer, CloudflareDns, CommandExecutor,
    PropagationWait, ProvisioningJob, ProvisioningService, ProvisioningSettings, SslCoordinator,
    SslSettings, SystemResolver,
};
use tenant_cloud::telemetry;
use tokio::sync::mpsc;
use tracing::{info, warn};

type Service = ProvisioningService<InMemorySubscriptionRepository, ChannelScheduler>;
type Coordinator = SslCoordinator<InMemorySubscriptionRepository, ChannelScheduler>;

fn build_stack(
    config: &AppConfig,
) -> Result<
    (
        Arc<Service>,
        Arc<Coordinator>,
        mpsc::UnboundedReceiver<ProvisioningJob>,
    ),
    AppError,
> {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

    let repository = Arc::new(InMemorySubscriptionRepository::default());
    let scheduler = Arc::new(ChannelScheduler::new(jobs_tx));
    let executor: Arc<dyn CommandExecutor> =
        Arc::new(BenchCommandRunner::new(&config.provisioning));
    let dns = Arc::new(CloudflareDns::new(&config.dns)?);
    let initializer = Arc::new(BenchTenantInitializer::new(executor.clone()));

    let service = Arc::new(ProvisioningService::new(
        repository.clone(),
        scheduler.clone(),
        executor,
        dns,
        initializer,
        ProvisioningSettings::from_config(config),
    ));

    let issuer = Arc::new(CertbotIssuer::new(
        &config.ssl,
        &config.provisioning.site_suffix,
    ));
    let coordinator = Arc::new(SslCoordinator::new(
        repository,
        scheduler,
        issuer,
        Arc::new(SystemResolver),
        SslSettings {
            enabled: config.ssl.enabled,
            expected_address: config.provisioning.server_address,
            wait: PropagationWait {
                ceiling: config.ssl.propagation_timeout,
                interval: config.ssl.propagation_interval,
            },
        },
    ));

    Ok((service, coordinator, jobs_rx))
}

fn spawn_worker(
    service: Arc<Service>,
    coordinator: Arc<Coordinator>,
    mut jobs_rx: mpsc::UnboundedReceiver<ProvisioningJob>,
) {
    tokio::spawn(async move {
        while let Some(job) = jobs_rx.recv().await {
            match job {
                ProvisioningJob::RunPipeline(id) => {
                    if let Err(err) = service.run(&id).await {
                        warn!(subscription = %id, error = %err, "pipeline run ended in failure");
                    }
                }
                ProvisioningJob::IssueCertificate(id) => {
                    if let Err(err) = coordinator.issue(&id).await {
                        warn!(subscription = %id, error = %err, "certificate task aborted");
                    }
                }
            }
        }
    });
}

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let (service, coordinator, jobs_rx) = build_stack(&config)?;
    spawn_worker(service.clone(), coordinator.clone(), jobs_rx);

    let sweep_interval = config.ssl.sweep_interval;
    let sweeper = coordinator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The immediate first tick would race service start-up.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweeper.sweep() {
                Ok(enqueued) if enqueued > 0 => {
                    info!(enqueued, "certificate sweep re-enqueued subscriptions");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "certificate sweep failed"),
            }
        }
    });

    let app = with_provisioning_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "tenant provisioning orchestrator ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// One-shot sweep pass for operators: re-enqueue certificate issuance for
/// every eligible subscription and drain the resulting jobs inline.
pub(crate) async fn run_sweep() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let (_service, coordinator, mut jobs_rx) = build_stack(&config)?;

    let enqueued = coordinator.sweep().map_err(AppError::Ssl)?;
    info!(enqueued, "certificate sweep complete");

    for _ in 0..enqueued {
        if let Some(ProvisioningJob::IssueCertificate(id)) = jobs_rx.recv().await {
            if let Err(err) = coordinator.issue(&id).await {
                warn!(subscription = %id, error = %err, "certificate task aborted");
            }
        }
    }
    Ok(())
}
