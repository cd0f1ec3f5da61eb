//! Service engine - the entry points that drive a composed service

use crate::core::args::ArgSpec;
use crate::core::component::{Configurable, Input, Model, Output};
use crate::core::config::{builtin_schema, merge_schema, Configuration, ServiceSettings};
use crate::core::error::Result;
use crate::execution::runner::{PipelineRunner, PipelineUnit, RunReport};
use crate::execution::scheduler::{Clock, Scheduler, Trigger};
use crate::persistence::{PersistenceBackend, RunSummary, RunTrigger};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted while the service runs
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    HealthCheckPassed {
        service_name: String,
    },
    RunStarted {
        run_id: Uuid,
        trigger: RunTrigger,
    },
    RunSucceeded {
        run_id: Uuid,
        report: RunReport,
    },
    RunFailed {
        run_id: Uuid,
        error: String,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

/// A configured service: settings plus its input, model and output
pub struct ServiceEngine<I, M, O> {
    settings: ServiceSettings,
    runner: PipelineRunner<I, M, O>,
    history: Option<Arc<dyn PersistenceBackend>>,
    event_handlers: Vec<EventHandler>,
}

impl<I, M, O> ServiceEngine<I, M, O>
where
    I: Input + Configurable,
    M: Model<Batch = I::Batch> + Configurable,
    O: Output<Batch = I::Batch, Predictions = M::Predictions> + Configurable,
{
    /// Every key this service recognizes: the built-ins plus each component's
    pub fn schema() -> Vec<ArgSpec> {
        let schema = merge_schema(builtin_schema(), I::args("input"));
        let schema = merge_schema(schema, O::args("output"));
        merge_schema(schema, M::args("model"))
    }

    /// Build every component from the resolved configuration
    ///
    /// All configuration errors surface here, before anything connects.
    pub fn from_config(config: &Configuration) -> Result<Self> {
        let settings = config.settings()?;
        Trigger::from_settings(&settings)?;

        let input = I::from_config(config, "input")?;
        let output = O::from_config(config, "output")?;
        let model = M::from_config(config, "model")?;

        Ok(Self::new(settings, PipelineUnit::new(input, model, output)))
    }
}

impl<I, M, O> ServiceEngine<I, M, O>
where
    I: Input,
    M: Model<Batch = I::Batch>,
    O: Output<Batch = I::Batch, Predictions = M::Predictions>,
{
    pub fn new(settings: ServiceSettings, unit: PipelineUnit<I, M, O>) -> Self {
        Self {
            settings,
            runner: PipelineRunner::new(unit),
            history: None,
            event_handlers: Vec::new(),
        }
    }

    /// Record every unit of work in `store`
    pub fn with_history(mut self, store: Arc<dyn PersistenceBackend>) -> Self {
        self.history = Some(store);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    fn emit_event(&self, event: ServiceEvent) {
        for handler in &self.event_handlers {
            handler(&event);
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn runner(&self) -> &PipelineRunner<I, M, O> {
        &self.runner
    }

    /// Health-check every collaborator and exit
    pub async fn run_ping_now(&self) -> Result<()> {
        self.runner.ping().await?;
        info!("{} is healthy", self.settings.name);
        self.emit_event(ServiceEvent::HealthCheckPassed {
            service_name: self.settings.name.clone(),
        });
        Ok(())
    }

    /// Health-check, then run exactly one unit of work
    pub async fn run_once_now(&self) -> Result<RunReport> {
        self.run_ping_now().await?;
        self.run_unit(RunTrigger::Once).await
    }

    /// Health-check, then run on the configured schedule
    ///
    /// With no `scheduled_time` or `interval` this runs one unit of work and
    /// returns. Otherwise it only returns when a unit of work fails.
    pub async fn run_service<C: Clock>(&self, clock: C) -> Result<()> {
        let trigger = Trigger::from_settings(&self.settings)?;
        self.run_ping_now().await?;

        let Some(trigger) = trigger else {
            info!("No schedule configured, running once");
            return self.run_unit(RunTrigger::Once).await.map(|_| ());
        };

        let resolution = self.settings.resolution_duration()?;
        info!("Starting {} on {:?}", self.settings.name, trigger);
        let mut scheduler = Scheduler::new(trigger, resolution, clock);
        match scheduler
            .run(|| async { self.run_unit(RunTrigger::Scheduled).await.map(|_| ()) })
            .await
        {
            Ok(never) => match never {},
            Err(err) => Err(err),
        }
    }

    async fn run_unit(&self, trigger: RunTrigger) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Starting run {} ({})", run_id, trigger);
        self.emit_event(ServiceEvent::RunStarted { run_id, trigger });

        let result = self.runner.run().await;

        let summary = match &result {
            Ok(report) => {
                self.emit_event(ServiceEvent::RunSucceeded {
                    run_id,
                    report: *report,
                });
                RunSummary::succeeded(run_id, &self.settings.name, trigger, started_at)
            }
            Err(err) => {
                error!("Run {} failed: {}", run_id, err);
                self.emit_event(ServiceEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
                RunSummary::failed(run_id, &self.settings.name, trigger, started_at, err)
            }
        };
        self.record(&summary).await;

        result
    }

    async fn record(&self, summary: &RunSummary) {
        if let Some(store) = &self.history {
            if let Err(err) = store.save_run(summary).await {
                warn!("Failed to save run {} to history: {:#}", summary.run_id, err);
            }
        }
    }
}
