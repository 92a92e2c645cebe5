//! The orchestrator facade.
//!
//! [`Orchestrator`] owns the event bus, the correlation registry and the
//! connection supervisor, and routes worker frames to the completion
//! pipeline. Completion work runs in spawned tasks bounded by a semaphore
//! so the receive loop never waits on downloads or uploads.

use std::sync::Arc;
use std::time::Duration;

use genforge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genforge_comfyui::client::ComfyUIClient;
use genforge_comfyui::messages::{ComfyUIMessage, ErrorData, ExecutedData, ExecutingData};
use genforge_comfyui::processor::FrameHandler;
use genforge_comfyui::reconnect::ReconnectPolicy;
use genforge_comfyui::supervisor::{ConnectionState, ConnectionSupervisor};
use genforge_events::{EventBus, GenerationEvent, LiveRelay, RawFrameEvent};
use tokio::sync::{broadcast, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{DurableStorage, Ledger, LiveNotifier, OutputStore, TemplateStore};
use crate::completion::CompletionPipeline;
use crate::config::OrchestratorConfig;
use crate::registry::CorrelationRegistry;
use crate::submitter::{JobSubmitter, SubmitError, SubmitRequest};

/// Lower bound on the eviction sweep interval.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The external services an [`Orchestrator`] is built from.
#[derive(Clone)]
pub struct Services {
    pub templates: Arc<dyn TemplateStore>,
    pub ledger: Arc<dyn Ledger>,
    pub storage: Arc<dyn DurableStorage>,
    pub outputs: Arc<dyn OutputStore>,
    /// When set, generation results are relayed to live user sessions.
    pub notifier: Option<Arc<dyn LiveNotifier>>,
}

/// Why a cancellation request failed.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Job '{0}' is not pending")]
    UnknownJob(String),

    #[error("Worker refused to cancel: {0}")]
    Worker(#[from] ComfyUIApiError),
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    api: ComfyUIApi,
    bus: Arc<EventBus>,
    registry: Arc<CorrelationRegistry>,
    supervisor: Arc<ConnectionSupervisor>,
    submitter: JobSubmitter,
    notifier: Option<Arc<dyn LiveNotifier>>,
    background: Mutex<Option<Background>>,
}

struct Background {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: Services) -> Self {
        let Services {
            templates,
            ledger,
            storage,
            outputs,
            notifier,
        } = services;

        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(CorrelationRegistry::new());
        let api = ComfyUIApi::new(config.api_url.clone()).with_auth_token(config.auth_token.clone());

        let pipeline = Arc::new(CompletionPipeline::new(
            api.clone(),
            storage,
            outputs,
            Arc::clone(&bus),
        ));
        let dispatcher = CompletionDispatcher {
            registry: Arc::clone(&registry),
            pipeline,
            bus: Arc::clone(&bus),
            permits: Arc::new(Semaphore::new(config.max_concurrent_completions.max(1))),
        };

        let client =
            ComfyUIClient::new(config.ws_url.clone()).with_auth_token(config.auth_token.clone());
        let supervisor = ConnectionSupervisor::new(
            client,
            ReconnectPolicy::fixed(config.reconnect_delay),
            config.shutdown_timeout,
            Arc::clone(&bus),
            Arc::new(dispatcher),
        );

        let submitter = JobSubmitter::new(api.clone(), templates, ledger, Arc::clone(&registry));

        Self {
            config,
            api,
            bus,
            registry,
            supervisor,
            submitter,
            notifier,
            background: Mutex::new(None),
        }
    }

    /// Connect to the worker and start background services.
    ///
    /// Calling this while already started does nothing.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        self.supervisor.start().await;
        if background.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(notifier) = &self.notifier {
            let relay = LiveRelay::new(Arc::clone(notifier));
            let receiver = self.bus.subscribe_results();
            handles.push(tokio::spawn(relay.run(receiver, cancel.clone())));
        }

        if let Some(ttl) = self.config.pending_job_ttl {
            let registry = Arc::clone(&self.registry);
            handles.push(tokio::spawn(sweep_stale_jobs(registry, ttl, cancel.clone())));
        }

        tracing::info!(
            ws_url = %self.config.ws_url,
            api_url = %self.config.api_url,
            max_concurrent_completions = self.config.max_concurrent_completions,
            "Orchestrator started",
        );
        *background = Some(Background { cancel, handles });
    }

    /// Disconnect from the worker and stop background services.
    pub async fn stop(&self) {
        let mut background = self.background.lock().await;
        self.supervisor.stop().await;

        if let Some(Background { cancel, handles }) = background.take() {
            cancel.cancel();
            for mut handle in handles {
                if tokio::time::timeout(self.config.shutdown_timeout, &mut handle)
                    .await
                    .is_err()
                {
                    tracing::warn!("Background task did not exit in time, aborting");
                    handle.abort();
                }
            }
        }
        tracing::info!(pending_jobs = self.registry.len(), "Orchestrator stopped");
    }

    /// Submit a generation job; returns the worker-assigned job id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, SubmitError> {
        self.submitter.submit(request).await
    }

    /// Remove a pending job from the worker queue.
    ///
    /// On success the job's context is dropped and a
    /// [`GenerationEvent::Cancelled`] is published. If the job completed
    /// while the request was in flight, its result stands and no
    /// cancellation is published.
    pub async fn cancel(&self, job_id: &str) -> Result<(), CancelError> {
        if !self.registry.contains(job_id) {
            return Err(CancelError::UnknownJob(job_id.to_string()));
        }

        self.api.cancel_execution(job_id).await?;

        match self.registry.claim_and_remove(job_id) {
            Some(context) => {
                tracing::info!(job_id = %job_id, user_id = context.user_id, "Generation cancelled");
                self.bus.publish_result(GenerationEvent::Cancelled {
                    job_id: context.job_id,
                    user_id: context.user_id,
                    template_id: context.template_id,
                });
            }
            None => {
                tracing::info!(job_id = %job_id, "Job finished before cancellation took effect");
            }
        }
        Ok(())
    }

    /// Interrupt whatever the worker is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        self.api.interrupt().await
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawFrameEvent> {
        self.bus.subscribe_raw()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<GenerationEvent> {
        self.bus.subscribe_results()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    /// Whether `job_id` is still awaiting its completion.
    pub fn is_pending(&self, job_id: &str) -> bool {
        self.registry.contains(job_id)
    }

    pub fn pending_jobs(&self) -> usize {
        self.registry.len()
    }
}

/// Routes worker messages to the registry and completion pipeline.
struct CompletionDispatcher {
    registry: Arc<CorrelationRegistry>,
    pipeline: Arc<CompletionPipeline>,
    bus: Arc<EventBus>,
    permits: Arc<Semaphore>,
}

impl FrameHandler for CompletionDispatcher {
    fn handle(&self, message: ComfyUIMessage) {
        match message {
            ComfyUIMessage::Executed(data) => self.on_executed(data),
            ComfyUIMessage::ExecutionError(data) => self.on_execution_error(data),
            ComfyUIMessage::Executing(data) => self.on_executing(data),
            _ => {}
        }
    }
}

impl CompletionDispatcher {
    /// The first output frame carrying final artifacts claims the job.
    fn on_executed(&self, data: ExecutedData) {
        let artifacts = data.final_artifacts();
        if artifacts.is_empty() {
            tracing::debug!(job_id = %data.prompt_id, node = ?data.node, "Output frame has no final artifacts");
            return;
        }

        let Some(context) = self.registry.claim_and_remove(&data.prompt_id) else {
            tracing::debug!(job_id = %data.prompt_id, "Completion for unknown or already claimed job");
            return;
        };

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            pipeline.process(context, artifacts).await;
        });
    }

    fn on_execution_error(&self, data: ErrorData) {
        let Some(context) = self.registry.claim_and_remove(&data.prompt_id) else {
            tracing::debug!(job_id = %data.prompt_id, "Execution error for unknown job");
            return;
        };

        tracing::error!(
            job_id = %context.job_id,
            user_id = context.user_id,
            node_id = ?data.node_id,
            error = %data.exception_message,
            "Generation failed on worker",
        );
        self.bus.publish_result(GenerationEvent::Failed {
            job_id: context.job_id,
            user_id: context.user_id,
            template_id: context.template_id,
            error: data.exception_message,
        });
    }

    /// `executing` with no node marks the end of a prompt. A job still
    /// registered at that point produced no final outputs.
    fn on_executing(&self, data: ExecutingData) {
        if data.node.is_some() {
            return;
        }
        let Some(job_id) = data.prompt_id else {
            return;
        };
        if let Some(context) = self.registry.claim_and_remove(&job_id) {
            tracing::info!(
                job_id = %job_id,
                user_id = context.user_id,
                "Job finished without final outputs",
            );
        }
    }
}

/// Periodically drop pending jobs older than `ttl`.
async fn sweep_stale_jobs(registry: Arc<CorrelationRegistry>, ttl: Duration, cancel: CancellationToken) {
    let interval = (ttl / 4).max(MIN_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        for context in registry.evict_older_than(ttl) {
            tracing::warn!(
                job_id = %context.job_id,
                user_id = context.user_id,
                template_id = context.template_id,
                age_ms = context.elapsed_ms(),
                "Evicted stale pending job",
            );
        }
    }
}
