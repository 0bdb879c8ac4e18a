//! Wiring of the middleware components
//!
//! All coupling between the components lives here: [`Middleware::build`]
//! constructs every component from the configuration and
//! [`Middleware::start`] spawns the consumers, the scheduler and the status
//! server.

use crate::acknowledgement::{
    AcknowledgementEvent, AcknowledgementHandler, AcknowledgementStore,
    CloudOnboardingFailureCache, FollowUpEvent,
};
use crate::audit::{AuditLog, TracingAuditLog};
use crate::cache::{
    resend_channel, MessageCache, PersistentMessageCache, PublishNonTelemetryDataService,
    ResendConsumer, ResendMessageCacheEntryEvent, TransientMessageCache,
};
use crate::config::{CacheBackend, MiddlewareConfig};
use crate::endpoint::{EndpointRepository, EndpointService, InMemoryEndpointRepository};
use crate::error::MiddlewareResult;
use crate::observability::health::HealthServer;
use crate::scheduled::{
    AcknowledgementSweepJob, AlwaysOperational, ConnectionSupervisor, EndpointQueryJob, JobSet,
    MessageCacheSendingJob, PlatformStatus, QueryKind, ScheduledJob, Scheduler,
};
use crate::status::StatusService;
use crate::transport::mqtt::{InboundRouter, MqttClientManager};
use crate::transport::ClientProvider;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receivers handed to the consumer tasks on start
struct Channels {
    acknowledgements: mpsc::Receiver<AcknowledgementEvent>,
    resend: mpsc::Receiver<ResendMessageCacheEntryEvent>,
    follow_ups: mpsc::Receiver<FollowUpEvent>,
    follow_up_sender: mpsc::Sender<FollowUpEvent>,
}

pub struct Middleware {
    config: MiddlewareConfig,
    pub repository: Arc<dyn EndpointRepository>,
    pub acknowledgements: Arc<AcknowledgementStore>,
    pub cache: Arc<dyn MessageCache>,
    pub clients: Arc<MqttClientManager>,
    pub publisher: Arc<PublishNonTelemetryDataService>,
    pub status: Arc<StatusService>,
    pub endpoints: EndpointService,
    pub cloud_onboarding_failures: Arc<CloudOnboardingFailureCache>,
    audit: Arc<dyn AuditLog>,
    platform: Arc<dyn PlatformStatus>,
    channels: Option<Channels>,
    scheduler: Option<Scheduler>,
    tasks: Vec<JoinHandle<()>>,
}

impl Middleware {
    pub async fn build(config: MiddlewareConfig) -> MiddlewareResult<Self> {
        let repository: Arc<dyn EndpointRepository> = match &config.persistence.endpoints_file {
            Some(path) => Arc::new(InMemoryEndpointRepository::load_from_file(path).await?),
            None => Arc::new(InMemoryEndpointRepository::new()),
        };
        let acknowledgements = Arc::new(AcknowledgementStore::new(
            config.acknowledgement.sweep_window(),
        ));

        let (ack_sender, ack_receiver) = mpsc::channel(config.mqtt.inbound_buffer);
        let (follow_up_sender, follow_up_receiver) = mpsc::channel(config.mqtt.inbound_buffer);
        let (resend_sender, resend_receiver) = resend_channel(config.cache.resend_buffer);

        let ca = MqttClientManager::load_ca(&config.mqtt)?;
        let clients = Arc::new(MqttClientManager::new(
            config.mqtt.clone(),
            ca,
            InboundRouter::new(ack_sender),
        ));
        let provider: Arc<dyn ClientProvider> = clients.clone();

        let cache: Arc<dyn MessageCache> = match config.cache.backend {
            CacheBackend::Transient => Arc::new(TransientMessageCache::new(
                config.cache.ttl_secs,
                resend_sender,
            )),
            CacheBackend::Persistent => {
                warn!("The persistent message cache is not supported, cache operations will fail.");
                Arc::new(PersistentMessageCache::new())
            }
        };

        let audit: Arc<dyn AuditLog> = Arc::new(TracingAuditLog);
        let publisher = Arc::new(PublishNonTelemetryDataService::new(
            repository.clone(),
            provider.clone(),
            acknowledgements.clone(),
            cache.clone(),
            audit.clone(),
        ));
        let cloud_onboarding_failures = Arc::new(CloudOnboardingFailureCache::new());
        let status = Arc::new(
            StatusService::new(
                repository.clone(),
                acknowledgements.clone(),
                cache.clone(),
                provider.clone(),
            )
            .with_cloud_onboarding_failures(cloud_onboarding_failures.clone()),
        );
        let endpoints = EndpointService::new(repository.clone(), acknowledgements.clone(), provider);

        Ok(Self {
            config,
            repository,
            acknowledgements,
            cache,
            clients,
            publisher,
            status,
            endpoints,
            cloud_onboarding_failures,
            audit,
            platform: Arc::new(AlwaysOperational),
            channels: Some(Channels {
                acknowledgements: ack_receiver,
                resend: resend_receiver,
                follow_ups: follow_up_receiver,
                follow_up_sender,
            }),
            scheduler: None,
            tasks: Vec::new(),
        })
    }

    /// Replace the platform status source gating the maintenance jobs
    pub fn with_platform_status(mut self, platform: Arc<dyn PlatformStatus>) -> Self {
        self.platform = platform;
        self
    }

    /// The scheduled jobs built from the shared components
    pub fn jobs(&self) -> JobSet {
        let provider: Arc<dyn ClientProvider> = self.clients.clone();
        let query = |kind: QueryKind| -> Arc<dyn ScheduledJob> {
            Arc::new(EndpointQueryJob::new(
                kind,
                self.repository.clone(),
                provider.clone(),
                self.acknowledgements.clone(),
                self.audit.clone(),
            ))
        };

        JobSet {
            connection_check: Arc::new(ConnectionSupervisor::new(
                self.repository.clone(),
                provider.clone(),
                self.audit.clone(),
            )),
            status_logging: query(QueryKind::FeedHeaderQuery),
            recipient_query: query(QueryKind::ListEndpoints),
            fetching_and_confirming_existing_messages: query(QueryKind::FeedMessageQuery),
            empty_message_cache: Arc::new(MessageCacheSendingJob::new(
                self.cache.clone(),
                self.platform.clone(),
            )),
            message_waiting_for_ack_removal: Arc::new(AcknowledgementSweepJob::new(
                self.acknowledgements.clone(),
                self.platform.clone(),
            )),
        }
    }

    /// Spawn the consumers, start the scheduler and the status server
    pub async fn start(&mut self) -> MiddlewareResult<()> {
        if let Some(channels) = self.channels.take() {
            let handler = AcknowledgementHandler::new(
                self.acknowledgements.clone(),
                self.endpoints.clone(),
                channels.follow_up_sender,
            )
            .with_cloud_onboarding_failures(self.cloud_onboarding_failures.clone());
            self.tasks
                .push(tokio::spawn(handler.run(channels.acknowledgements)));
            self.tasks.push(tokio::spawn(
                ResendConsumer::new(self.publisher.clone()).run(channels.resend),
            ));
            self.tasks
                .push(tokio::spawn(log_follow_ups(channels.follow_ups)));
        }

        let mut scheduler = Scheduler::new().await?;
        scheduler
            .add_all(&self.config.scheduled, &self.jobs())
            .await?;
        scheduler.start().await?;
        self.scheduler = Some(scheduler);

        let health = Arc::new(HealthServer::new(self.config.health.port, self.status.clone()));
        self.tasks.push(tokio::spawn(health.start()));

        info!("Middleware started.");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> MiddlewareResult<()> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await?;
        }
        self.clients.disconnect_all().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Middleware stopped.");
        Ok(())
    }
}

/// Follow-ups are handled by components outside this service
async fn log_follow_ups(mut follow_ups: mpsc::Receiver<FollowUpEvent>) {
    while let Some(event) = follow_ups.recv().await {
        match event {
            FollowUpEvent::UpdateSubscriptions {
                agrirouter_endpoint_id,
            } => info!(
                "Capabilities of endpoint '{}' accepted, subscriptions can be updated.",
                agrirouter_endpoint_id
            ),
            FollowUpEvent::ActivateDevice {
                team_set_context_id,
            } => info!(
                "Device description accepted, device '{}' can be activated.",
                team_set_context_id.as_deref().unwrap_or(crate::audit::NA)
            ),
            FollowUpEvent::CloudOffboarding {
                external_virtual_endpoint_ids,
            } => info!(
                "Virtual endpoints {:?} were offboarded.",
                external_virtual_endpoint_ids
            ),
        }
    }
}
