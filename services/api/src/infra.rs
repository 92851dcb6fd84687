use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tenant_cloud::provisioning::{
    is_ssl_retry_candidate, ProvisioningJob, RepositoryError, ScheduleError, Subscription,
    SubscriptionId, SubscriptionRepository, TaskScheduler,
};
use tokio::sync::mpsc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemorySubscriptionRepository {
    records: Arc<Mutex<HashMap<String, Subscription>>>,
}

impl SubscriptionRepository for InMemorySubscriptionRepository {
    fn insert(&self, subscription: Subscription) -> Result<Subscription, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&subscription.id.0) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(subscription.id.0.clone(), subscription.clone());
        Ok(subscription)
    }

    fn load(&self, id: &SubscriptionId) -> Result<Option<Subscription>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(&id.0).cloned())
    }

    fn save(&self, subscription: &Subscription) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        guard.insert(subscription.id.0.clone(), subscription.clone());
        Ok(())
    }

    fn ssl_retry_candidates(&self) -> Result<Vec<Subscription>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|record| is_ssl_retry_candidate(record))
            .cloned()
            .collect())
    }
}

/// Scheduler backed by the worker loop's job channel. Hand-off happens after
/// the caller's save has returned, so a consumer always observes the state the
/// job was scheduled against.
pub(crate) struct ChannelScheduler {
    jobs: mpsc::UnboundedSender<ProvisioningJob>,
}

impl ChannelScheduler {
    pub(crate) fn new(jobs: mpsc::UnboundedSender<ProvisioningJob>) -> Self {
        Self { jobs }
    }
}

impl TaskScheduler for ChannelScheduler {
    fn schedule(&self, job: ProvisioningJob) -> Result<(), ScheduleError> {
        self.jobs
            .send(job)
            .map_err(|err| ScheduleError::Unavailable(err.to_string()))
    }
}
