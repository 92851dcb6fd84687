//! Integration specifications for the certificate retry task: idempotent
//! short-circuit, persisted attempt accounting, the retry bound, and the
//! periodic sweep filter.

mod common {
    use std::collections::{HashMap, VecDeque};
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use tenant_cloud::provisioning::{
        is_ssl_retry_candidate, AppPackage, BusinessProfile, CertificateIssuer, DnsResolver,
        IssuanceError, PropagationWait, ProvisioningJob, RepositoryError, ScheduleError,
        SslCoordinator, SslSettings, Subscription, SubscriptionId, SubscriptionRepository,
        TaskScheduler,
    };

    pub(super) const SERVER_ADDRESS: &str = "203.0.113.7";

    pub(super) fn provisioned_subscription(id: &str, instance: &str) -> Subscription {
        let mut subscription = Subscription::new(
            SubscriptionId(id.to_string()),
            instance,
            AppPackage::Starter,
            BusinessProfile {
                company_name: "Acme Trading".to_string(),
                abbr: "AT".to_string(),
                country: "Saudi Arabia".to_string(),
                currency: "SAR".to_string(),
                timezone: "Asia/Riyadh".to_string(),
                contact_email: "owner@acme.example".to_string(),
                branding_asset: None,
            },
        );
        subscription.assign_site_name("tenant.cloud");
        subscription.activate();
        subscription
    }

    #[derive(Default)]
    pub(super) struct MemoryRepository {
        records: Mutex<HashMap<String, Subscription>>,
    }

    impl MemoryRepository {
        pub(super) fn put(&self, subscription: Subscription) {
            self.records
                .lock()
                .expect("repository mutex poisoned")
                .insert(subscription.id.0.clone(), subscription);
        }

        pub(super) fn get(&self, id: &SubscriptionId) -> Subscription {
            self.records
                .lock()
                .expect("repository mutex poisoned")
                .get(&id.0)
                .cloned()
                .expect("record present")
        }
    }

    impl SubscriptionRepository for MemoryRepository {
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
            assert!(subscription.invariant_holds(), "invariant violated on save");
            self.records
                .lock()
                .expect("repository mutex poisoned")
                .insert(subscription.id.0.clone(), subscription.clone());
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

    /// Scheduler fake capturing the ssl status that was durable at hand-off
    /// time, to pin down the persist-then-schedule ordering.
    pub(super) struct RecordingScheduler {
        repository: Arc<MemoryRepository>,
        jobs: Mutex<VecDeque<(ProvisioningJob, Option<Subscription>)>>,
    }

    impl RecordingScheduler {
        pub(super) fn new(repository: Arc<MemoryRepository>) -> Self {
            Self {
                repository,
                jobs: Mutex::new(VecDeque::new()),
            }
        }

        pub(super) fn pop(&self) -> Option<(ProvisioningJob, Option<Subscription>)> {
            self.jobs.lock().expect("scheduler mutex poisoned").pop_front()
        }

        pub(super) fn pending(&self) -> usize {
            self.jobs.lock().expect("scheduler mutex poisoned").len()
        }
    }

    impl TaskScheduler for RecordingScheduler {
        fn schedule(&self, job: ProvisioningJob) -> Result<(), ScheduleError> {
            let id = match &job {
                ProvisioningJob::RunPipeline(id) | ProvisioningJob::IssueCertificate(id) => id,
            };
            let persisted = self.repository.load(id).expect("repository readable");
            self.jobs
                .lock()
                .expect("scheduler mutex poisoned")
                .push_back((job, persisted));
            Ok(())
        }
    }

    /// Issuer fake failing a scripted number of times before succeeding.
    pub(super) struct FlakyIssuer {
        issued: Mutex<Vec<String>>,
        failures_remaining: AtomicUsize,
        error_text: String,
    }

    impl FlakyIssuer {
        pub(super) fn failing(times: usize, error_text: &str) -> Self {
            Self {
                issued: Mutex::new(Vec::new()),
                failures_remaining: AtomicUsize::new(times),
                error_text: error_text.to_string(),
            }
        }

        pub(super) fn pre_issued(hostname: &str) -> Self {
            Self {
                issued: Mutex::new(vec![hostname.to_string()]),
                failures_remaining: AtomicUsize::new(0),
                error_text: String::new(),
            }
        }

        pub(super) fn certificates_issued(&self) -> usize {
            self.issued.lock().expect("issuer mutex poisoned").len()
        }
    }

    #[async_trait]
    impl CertificateIssuer for FlakyIssuer {
        async fn is_issued(&self, hostname: &str) -> bool {
            self.issued
                .lock()
                .expect("issuer mutex poisoned")
                .iter()
                .any(|issued| issued == hostname)
        }

        async fn issue(&self, hostname: &str) -> Result<(), IssuanceError> {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(IssuanceError::Rejected(self.error_text.clone()));
            }
            self.issued
                .lock()
                .expect("issuer mutex poisoned")
                .push(hostname.to_string());
            Ok(())
        }
    }

    pub(super) struct InstantResolver;

    #[async_trait]
    impl DnsResolver for InstantResolver {
        async fn resolve(&self, _hostname: &str) -> Option<IpAddr> {
            SERVER_ADDRESS.parse().ok()
        }
    }

    pub(super) fn settings(enabled: bool) -> SslSettings {
        SslSettings {
            enabled,
            expected_address: SERVER_ADDRESS.parse().expect("valid address"),
            wait: PropagationWait {
                ceiling: Duration::from_millis(40),
                interval: Duration::from_millis(10),
            },
        }
    }

    pub(super) struct Harness {
        pub(super) coordinator: SslCoordinator<MemoryRepository, RecordingScheduler>,
        pub(super) repository: Arc<MemoryRepository>,
        pub(super) scheduler: Arc<RecordingScheduler>,
        pub(super) issuer: Arc<FlakyIssuer>,
    }

    pub(super) fn build_harness(issuer: FlakyIssuer, enabled: bool) -> Harness {
        let repository = Arc::new(MemoryRepository::default());
        let scheduler = Arc::new(RecordingScheduler::new(repository.clone()));
        let issuer = Arc::new(issuer);
        let coordinator = SslCoordinator::new(
            repository.clone(),
            scheduler.clone(),
            issuer.clone(),
            Arc::new(InstantResolver),
            settings(enabled),
        );
        Harness {
            coordinator,
            repository,
            scheduler,
            issuer,
        }
    }
}

mod issuance {
    use super::common::*;
    use tenant_cloud::provisioning::{ProvisioningJob, SslStatus, MAX_SSL_ATTEMPTS};

    #[tokio::test]
    async fn existing_certificate_short_circuits_without_an_attempt() {
        let harness = build_harness(FlakyIssuer::pre_issued("acme.tenant.cloud"), true);
        let subscription = provisioned_subscription("sub-ssl-01", "acme");
        let id = subscription.id.clone();
        harness.repository.put(subscription);

        let status = harness.coordinator.issue(&id).await.expect("task runs");
        assert_eq!(status, SslStatus::Issued);

        let stored = harness.repository.get(&id);
        assert_eq!(stored.ssl_status, SslStatus::Issued);
        assert_eq!(stored.ssl_attempts, 0);
        assert_eq!(harness.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn failure_is_committed_before_the_retry_is_scheduled() {
        let harness = build_harness(
            FlakyIssuer::failing(usize::MAX, "acme validation failed, password: t0ps3cret"),
            true,
        );
        let subscription = provisioned_subscription("sub-ssl-02", "acme");
        let id = subscription.id.clone();
        harness.repository.put(subscription);

        let status = harness.coordinator.issue(&id).await.expect("task runs");
        assert_eq!(status, SslStatus::Failed);

        let stored = harness.repository.get(&id);
        assert_eq!(stored.ssl_attempts, 1);
        let last_error = stored.ssl_last_error.expect("error recorded");
        assert!(!last_error.contains("t0ps3cret"));
        assert!(last_error.contains("password: ******"));

        let (job, persisted) = harness.scheduler.pop().expect("retry scheduled");
        assert_eq!(job, ProvisioningJob::IssueCertificate(id.clone()));
        let persisted = persisted.expect("state durable at hand-off");
        assert_eq!(persisted.ssl_status, SslStatus::Failed);
        assert_eq!(persisted.ssl_attempts, 1);
    }

    #[tokio::test]
    async fn retries_stop_once_the_attempt_bound_is_reached() {
        let harness = build_harness(FlakyIssuer::failing(usize::MAX, "tls handshake refused"), true);
        let subscription = provisioned_subscription("sub-ssl-03", "acme");
        let id = subscription.id.clone();
        harness.repository.put(subscription);

        // Drive the task the way the worker would: run, then follow the
        // scheduled retries until none remain.
        harness.coordinator.issue(&id).await.expect("first attempt");
        while let Some((job, _)) = harness.scheduler.pop() {
            match job {
                ProvisioningJob::IssueCertificate(job_id) => {
                    harness.coordinator.issue(&job_id).await.expect("retry runs");
                }
                other => panic!("unexpected job {other:?}"),
            }
        }

        let stored = harness.repository.get(&id);
        assert_eq!(stored.ssl_attempts, MAX_SSL_ATTEMPTS);
        assert_eq!(stored.ssl_status, SslStatus::Failed);
        assert_eq!(harness.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn success_after_a_failure_clears_the_recorded_error() {
        let harness = build_harness(FlakyIssuer::failing(1, "transient validation error"), true);
        let subscription = provisioned_subscription("sub-ssl-04", "acme");
        let id = subscription.id.clone();
        harness.repository.put(subscription);

        harness.coordinator.issue(&id).await.expect("first attempt");
        assert_eq!(harness.repository.get(&id).ssl_status, SslStatus::Failed);

        let (job, _) = harness.scheduler.pop().expect("retry scheduled");
        match job {
            ProvisioningJob::IssueCertificate(job_id) => {
                let status = harness.coordinator.issue(&job_id).await.expect("retry runs");
                assert_eq!(status, SslStatus::Issued);
            }
            other => panic!("unexpected job {other:?}"),
        }

        let stored = harness.repository.get(&id);
        assert_eq!(stored.ssl_status, SslStatus::Issued);
        assert_eq!(stored.ssl_attempts, 2);
        assert!(stored.ssl_last_error.is_none());
        assert_eq!(harness.issuer.certificates_issued(), 1);
    }

    #[tokio::test]
    async fn disabled_coordinator_leaves_the_record_untouched() {
        let harness = build_harness(FlakyIssuer::failing(usize::MAX, "unused"), false);
        let subscription = provisioned_subscription("sub-ssl-05", "acme");
        let id = subscription.id.clone();
        harness.repository.put(subscription);

        let status = harness.coordinator.issue(&id).await.expect("task runs");
        assert_eq!(status, SslStatus::Pending);
        assert_eq!(harness.repository.get(&id).ssl_attempts, 0);
    }
}

mod sweep {
    use super::common::*;
    use tenant_cloud::provisioning::{ProvisioningJob, SslStatus, SubscriptionId};

    #[tokio::test]
    async fn sweep_enqueues_only_provisioned_pending_or_failed_records() {
        let harness = build_harness(FlakyIssuer::failing(0, ""), true);

        let mut failed = provisioned_subscription("sub-sweep-01", "alpha");
        failed.ssl_status = SslStatus::Failed;
        failed.ssl_attempts = 3;
        harness.repository.put(failed);

        let pending = provisioned_subscription("sub-sweep-02", "bravo");
        harness.repository.put(pending);

        let mut issued = provisioned_subscription("sub-sweep-03", "charlie");
        issued.ssl_status = SslStatus::Issued;
        harness.repository.put(issued);

        // Still mid-pipeline: not provisioned, so the sweep must skip it.
        let unfinished = {
            let mut subscription = provisioned_subscription("sub-sweep-04", "delta");
            subscription.provisioned = false;
            subscription.status = tenant_cloud::provisioning::SubscriptionStatus::Failed;
            subscription.provisioning_step =
                tenant_cloud::provisioning::ProvisioningStep::Bootstrapped;
            subscription
        };
        harness.repository.put(unfinished);

        let enqueued = harness.coordinator.sweep().expect("sweep runs");
        assert_eq!(enqueued, 2);

        let mut swept: Vec<SubscriptionId> = Vec::new();
        while let Some((job, _)) = harness.scheduler.pop() {
            match job {
                ProvisioningJob::IssueCertificate(id) => swept.push(id),
                other => panic!("unexpected job {other:?}"),
            }
        }
        let swept: Vec<String> = swept.into_iter().map(|id| id.0).collect();
        assert!(swept.contains(&"sub-sweep-01".to_string()));
        assert!(swept.contains(&"sub-sweep-02".to_string()));
        assert_eq!(swept.len(), 2);
    }

    #[tokio::test]
    async fn disabled_sweep_enqueues_nothing() {
        let harness = build_harness(FlakyIssuer::failing(0, ""), false);
        let subscription = provisioned_subscription("sub-sweep-05", "echo");
        harness.repository.put(subscription);

        let enqueued = harness.coordinator.sweep().expect("sweep runs");
        assert_eq!(enqueued, 0);
        assert_eq!(harness.scheduler.pending(), 0);
    }
}
