//! # Exporter
//!
//! Push orchestration returned from cloudwatch_emf_exporter::Builder
//!
//! A push translates the batch, groups the events by resolved destination and hands each group to
//! the registry's pusher for that destination. Destinations are pushed concurrently, every error
//! is collected into one [ExportError].

use super::batch::MetricBatch;
use super::builder::{Config, OutputDestination};
use super::client::{ClientFactory, ClientSettings, LogEvent, LogsService};
use super::error::{ExportError, PushError, StartupError};
use super::middleware::{ExtensionHost, MiddlewareChain};
use super::pusher::LogPusher;
use super::registry::{ArcPusher, PusherRegistry};
use super::resolver::DestinationKey;
use super::translate::{self, Rules};
use futures::future::join_all;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::Layer;
use tracing::{debug, error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Running,
    Shutdown,
}

pub struct Exporter {
    config: Config,
    client_factory: Option<ClientFactory>,
    /// Set by a successful start, stays `None` otherwise
    client: Mutex<Option<LogsService>>,
    registry: PusherRegistry,
    state: Mutex<State>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl Exporter {
    pub(crate) fn new(config: Config, client_factory: Option<ClientFactory>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            config,
            client_factory,
            client: Mutex::new(None),
            registry: PusherRegistry::new(),
            state: Mutex::new(State::Created),
            writer: Mutex::new(writer),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the ingestion client and wrap it in the host's middleware
    ///
    /// A failed start leaves the exporter without a client, start may be called again
    pub fn start(&self, host: &dyn ExtensionHost) -> Result<(), StartupError> {
        // Held for the whole start so concurrent starts can not both build a client
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Created => {}
            State::Started | State::Running => return Err(StartupError::AlreadyStarted),
            State::Shutdown => return Err(StartupError::ShutDown),
        }

        if self.config.output_destination == OutputDestination::Stdout {
            info!("Writing EMF log events to the output writer");
            *state = State::Started;
            return Ok(());
        }

        let region = self
            .config
            .region
            .as_deref()
            .filter(|region| !region.is_empty())
            .ok_or(StartupError::MissingRegion)?;

        let chain = match &self.config.middleware_id {
            Some(id) => MiddlewareChain::from_host(host, id)?,
            None => MiddlewareChain::new(),
        };

        let factory = self
            .client_factory
            .as_ref()
            .ok_or_else(|| StartupError::Client("no client factory configured".into()))?;
        let client = factory(&ClientSettings {
            region: region.to_string(),
        })
        .map_err(StartupError::Client)?;

        let client = if chain.is_empty() {
            client
        } else {
            BoxCloneService::new(chain.layer(client))
        };

        *self.client.lock().unwrap() = Some(client);
        *state = State::Started;
        info!(
            region,
            log_group_name = %self.config.log_group_name,
            log_stream_name = %self.config.log_stream_name,
            "Started CloudWatch EMF exporter"
        );

        Ok(())
    }

    /// Export one batch
    ///
    /// Destinations that fail do not stop the others, the returned error holds every failure and
    /// is permanent when any of them is
    pub async fn push(&self, batch: &MetricBatch, cancel: &CancellationToken) -> Result<(), ExportError> {
        self.enter_running()?;

        let translated = translate::translate(batch, &self.rules()).map_err(PushError::from)?;
        debug!(data_points = batch.data_point_count(), "Translated metric batch");

        if self.config.output_destination == OutputDestination::Stdout {
            return self.write_events(translated.into_events()).map_err(ExportError::from);
        }

        let client = self.client.lock().unwrap().clone().ok_or(PushError::NotRunning)?;
        let mut errors = Vec::new();

        // Unresolved groups claim their literal key but never send
        for unresolved in translated.unresolved {
            self.registry
                .get_or_create(&unresolved.key, || self.new_pusher(&unresolved.key, &client));
            errors.push(PushError::from(unresolved.error));
        }

        let pushes = translated.resolved.into_iter().map(|(key, events)| {
            let pusher = self.registry.get_or_create(&key, || self.new_pusher(&key, &client));
            async move {
                let result = push_events(&pusher, events, cancel).await;
                if let Err(err) = &result {
                    error!(destination = %key, "Failed to push metrics: {err}");
                }
                result
            }
        });
        errors.extend(join_all(pushes).await.into_iter().filter_map(Result::err));

        ExportError::from_errors(errors)
    }

    /// Flush every pusher and stop accepting pushes
    ///
    /// Waits for all flushes, calling it again after it returned is a no-op
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<(), ExportError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == State::Shutdown {
                return Ok(());
            }
            *state = State::Shutdown;
        }

        let mut errors = self.registry.shutdown(cancel).await;
        if self.config.output_destination == OutputDestination::Stdout {
            if let Err(err) = self.writer.lock().unwrap().flush() {
                errors.push(err.into());
            }
        }

        info!(errors = errors.len(), "Shut down CloudWatch EMF exporter");
        ExportError::from_errors(errors)
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &PusherRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn is_client_initialized(&self) -> bool {
        self.client.lock().unwrap().is_some()
    }

    fn enter_running(&self) -> Result<(), PushError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Shutdown => Err(PushError::NotRunning),
            State::Created if self.config.output_destination == OutputDestination::CloudWatch => {
                Err(PushError::NotRunning)
            }
            State::Started => {
                *state = State::Running;
                Ok(())
            }
            State::Created | State::Running => Ok(()),
        }
    }

    fn rules(&self) -> Rules<'_> {
        Rules {
            namespace: &self.config.namespace,
            log_group_name: &self.config.log_group_name,
            log_stream_name: &self.config.log_stream_name,
            dimension_rollup_option: self.config.dimension_rollup_option,
            metric_declarations: &self.config.metric_declarations,
        }
    }

    fn new_pusher(&self, key: &DestinationKey, client: &LogsService) -> ArcPusher {
        Arc::new(LogPusher::new(key.clone(), client.clone(), self.config.retry_policy()))
    }

    /// Write one EMF document per line
    fn write_events(&self, events: impl Iterator<Item = LogEvent>) -> Result<(), PushError> {
        let mut writer = self.writer.lock().unwrap();
        for event in events {
            writer.write_all(&event.message)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Add every event then flush, stopping at the first error
async fn push_events(pusher: &ArcPusher, events: Vec<LogEvent>, cancel: &CancellationToken) -> Result<(), PushError> {
    for event in events {
        pusher.add_log_entry(event, cancel).await?;
    }
    pusher.force_flush(cancel).await
}
