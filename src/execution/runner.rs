//! One unit of work: fetch, transform, predict, emit

use crate::core::component::{Input, Model, Output};
use crate::core::error::{Result, ServiceError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The three collaborators of a service
pub struct PipelineUnit<I, M, O> {
    pub input: I,
    pub model: M,
    pub output: O,
}

impl<I, M, O> PipelineUnit<I, M, O> {
    pub fn new(input: I, model: M, output: O) -> Self {
        Self {
            input,
            model,
            output,
        }
    }
}

/// Outcome of a successful unit of work
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub duration: Duration,
}

/// Health checks and units of work over a [`PipelineUnit`]
pub struct PipelineRunner<I, M, O> {
    unit: PipelineUnit<I, M, O>,
}

// Calls `reclaim` when dropped, so it also runs on early return or cancellation
struct ReclaimGuard<'a, M: Model>(&'a M);

impl<M: Model> Drop for ReclaimGuard<'_, M> {
    fn drop(&mut self) {
        self.0.reclaim();
    }
}

impl<I, M, O> PipelineRunner<I, M, O>
where
    I: Input,
    M: Model<Batch = I::Batch>,
    O: Output<Batch = I::Batch, Predictions = M::Predictions>,
{
    pub fn new(unit: PipelineUnit<I, M, O>) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> &PipelineUnit<I, M, O> {
        &self.unit
    }

    /// Check output, then input, then model, stopping at the first failure
    pub async fn ping(&self) -> Result<()> {
        check("output", self.unit.output.ping()).await?;
        check("input", self.unit.input.ping()).await?;
        check("model", self.unit.model.ping()).await?;
        Ok(())
    }

    /// Run one unit of work
    ///
    /// Each stage's error is returned as-is. The batch and intermediate
    /// results are dropped before this returns and the model is always
    /// reclaimed.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let _reclaim = ReclaimGuard(&self.unit.model);

        let batch = self.unit.input.fetch().await?;
        debug!("Fetched input batch");

        let transformed = self.unit.model.transform(&batch)?;
        let predictions = self.unit.model.predict(&transformed)?;
        drop(transformed);
        debug!("Model produced predictions");

        self.unit.output.emit(&batch, &predictions).await?;

        let report = RunReport {
            duration: started.elapsed(),
        };
        info!("Unit of work finished in {:?}", report.duration);
        Ok(report)
    }
}

async fn check<F>(component: &'static str, ping: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match ping.await {
        Ok(()) => {
            info!("Health check passed: {}", component);
            Ok(())
        }
        Err(err) => Err(ServiceError::HealthCheckFailed {
            component,
            source: Box::new(err),
        }),
    }
}
