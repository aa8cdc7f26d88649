/// Execution Orchestrator
///
/// Runs one function invocation end to end:
/// validate → image guard → package → acquire (warm or cold) → deliver →
/// run under deadline → sample → cleanup → classify → record.
///
/// **Execution Rules:**
/// 1. Precondition errors return before any container is touched
/// 2. Warm environments get the file copied in and run via exec
/// 3. Cold starts bind-mount a staging dir and run the file as the main process
/// 4. The deadline is enforced here; on expiry the environment is killed
/// 5. Only a pooled environment that exited 0 and was cleaned goes back to the pool
/// 6. Cleanup runs on every path, including infrastructure errors
/// 7. Every delivered invocation produces exactly one metrics record
use crate::config::EngineConfig;
use crate::images::ImageProvisioner;
use crate::metrics::MetricsRecorder;
use crate::outcome::{self, RunOutcome};
use crate::packager::{self, PackagedCode};
use crate::pool::{self, ExecutionEnvironment, Origin, WarmPool};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use lambdalite_common::types::{FunctionSpec, InvocationResult, Language, ResourceUsage, RuntimeSelector};
use lambdalite_common::{FaasError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Removes a container (by id or name) if an invocation is abandoned
/// mid-flight, e.g. the caller's future is dropped. Disarmed once the
/// environment is settled.
struct TerminationGuard {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    armed: bool,
}

impl TerminationGuard {
    fn arm(runtime: Arc<dyn ContainerRuntime>, container_id: &str) -> Self {
        Self {
            runtime,
            container_id: container_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // cannot await in Drop
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %self.container_id, "No runtime to clean up abandoned container");
            return;
        };
        let runtime = self.runtime.clone();
        let container_id = std::mem::take(&mut self.container_id);

        handle.spawn(async move {
            if let Err(e) = runtime.remove(&container_id).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up abandoned container");
            }
        });
    }
}

/// Raw result of one run before classification
struct RunReport {
    outcome: RunOutcome,
    usage: ResourceUsage,
    cold_start: bool,
    /// Time spent sampling usage; excluded from the response time
    probe: Duration,
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    images: Arc<ImageProvisioner>,
    pool: Arc<WarmPool>,
    metrics: MetricsRecorder,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, metrics: MetricsRecorder, config: EngineConfig) -> Self {
        let images = Arc::new(ImageProvisioner::new(runtime.clone(), &config));
        let pool = Arc::new(WarmPool::new(runtime.clone(), config.clone()));

        Self {
            runtime,
            images,
            pool,
            metrics,
            config,
        }
    }

    /// Connect to Docker (pre-flight ping) and the configured metrics store
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::connect()?);
        runtime.ping().await?;
        let metrics = MetricsRecorder::connect(config.redis_url.as_deref()).await?;
        Ok(Self::new(runtime, metrics, config))
    }

    /// Start-up sequence: make sure images exist, then prewarm every key
    pub async fn warm_up(&self) -> Result<usize> {
        self.images.ensure_images().await?;
        let started = self.pool.prewarm_all().await;
        info!(containers = started, "Warm pool ready");
        Ok(started)
    }

    /// Terminate all idle environments
    pub async fn shutdown(&self) -> usize {
        self.pool.drain().await
    }

    pub fn images(&self) -> &Arc<ImageProvisioner> {
        &self.images
    }

    pub fn pool(&self) -> &Arc<WarmPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[tracing::instrument(
        skip(self, function),
        fields(function = %function.name, language = %function.language, runtime = %function.runtime)
    )]
    pub async fn execute(&self, function: &FunctionSpec) -> Result<InvocationResult> {
        let language = function.validate()?;
        let selector = function.runtime;

        self.images.ensure_image(language).await?;

        let packaged = packager::package(language, &function.source_code);
        let deadline = function.timeout();

        let started = Instant::now();
        let report = match self.pool.acquire(language, selector) {
            Some(env) => self.run_pooled(env, &packaged, deadline).await?,
            None => self.run_cold(language, selector, &packaged, deadline).await?,
        };
        let elapsed = started.elapsed().saturating_sub(report.probe);

        let classified = outcome::classify(report.outcome, function.timeout_seconds);
        let result = InvocationResult {
            function_name: function.name.clone(),
            language,
            runtime: selector,
            status: classified.status,
            output: classified.output,
            response_time_seconds: elapsed.as_secs_f64(),
            error: classified.error,
            stdout: classified.stdout,
            stderr: classified.stderr,
            memory_usage_mb: report.usage.memory_mb,
            cpu_usage_percent: report.usage.cpu_percent,
            cold_start: report.cold_start,
        };

        info!(
            status = ?result.status,
            error = result.error,
            cold_start = result.cold_start,
            response_time = result.response_time_seconds,
            "Invocation finished"
        );

        self.metrics.record(&result.to_record()).await;
        Ok(result)
    }

    async fn run_pooled(
        &self,
        env: ExecutionEnvironment,
        packaged: &PackagedCode,
        deadline: Duration,
    ) -> Result<RunReport> {
        let guard = TerminationGuard::arm(self.runtime.clone(), env.id());
        let work_dir = self.config.work_dir.as_str();

        if let Err(e) = self
            .runtime
            .copy_file(env.id(), work_dir, &packaged.file_name, packaged.contents.as_bytes())
            .await
        {
            warn!(container_id = %env.id(), error = %e, "Failed to deliver code to warm container");
            self.discard(env).await;
            guard.disarm();
            return Err(e);
        }

        let run = tokio::time::timeout(deadline, self.runtime.exec(env.id(), packaged.command(work_dir))).await;

        let report = match run {
            Ok(Ok(process)) => {
                let probe_started = Instant::now();
                let usage = self.sample_usage(env.id()).await;
                let probe = probe_started.elapsed();

                let clean_exit = process.exit_code.unwrap_or(0) == 0;
                if clean_exit && self.remove_delivered(env.id(), packaged).await {
                    self.settle(env).await;
                } else {
                    self.discard(env).await;
                }

                RunReport {
                    outcome: RunOutcome::Exited(process),
                    usage,
                    cold_start: false,
                    probe,
                }
            }
            Ok(Err(e)) => {
                warn!(container_id = %env.id(), error = %e, "Execution failed in warm container");
                self.discard(env).await;
                RunReport {
                    outcome: RunOutcome::Broken(e.to_string()),
                    usage: ResourceUsage::default(),
                    cold_start: false,
                    probe: Duration::ZERO,
                }
            }
            Err(_) => {
                warn!(container_id = %env.id(), timeout_secs = deadline.as_secs(), "Execution timed out, killing container");
                self.discard(env).await;
                RunReport {
                    outcome: RunOutcome::TimedOut,
                    usage: ResourceUsage::default(),
                    cold_start: false,
                    probe: Duration::ZERO,
                }
            }
        };

        guard.disarm();
        Ok(report)
    }

    async fn run_cold(
        &self,
        language: Language,
        selector: RuntimeSelector,
        packaged: &PackagedCode,
        deadline: Duration,
    ) -> Result<RunReport> {
        let (staging, mount) = self.stage(packaged).await?;

        let mut spec = pool::container_spec(&self.config, language, selector, Origin::ColdStart);
        spec.command = packaged.command(&self.config.work_dir);
        spec.mount = Some(mount);

        // armed by name: the container exists before start_container returns
        let guard = TerminationGuard::arm(self.runtime.clone(), &spec.name);
        let id = match self.runtime.start_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                guard.disarm();
                return Err(e);
            }
        };
        debug!(container_id = %id, name = %spec.name, "Cold start");
        let env = ExecutionEnvironment::cold_started(id, language, selector);

        let outcome = match tokio::time::timeout(deadline, self.runtime.wait(env.id())).await {
            Ok(Ok(process)) => RunOutcome::Exited(process),
            Ok(Err(e)) => {
                warn!(container_id = %env.id(), error = %e, "Execution failed in cold container");
                RunOutcome::Broken(e.to_string())
            }
            Err(_) => {
                warn!(container_id = %env.id(), timeout_secs = deadline.as_secs(), "Execution timed out, killing container");
                RunOutcome::TimedOut
            }
        };

        self.pool.terminate(env).await;
        guard.disarm();

        if let Err(e) = staging.close() {
            warn!(error = %e, "Failed to delete staging directory");
        }

        Ok(RunReport {
            outcome,
            usage: ResourceUsage::default(),
            cold_start: true,
            probe: Duration::ZERO,
        })
    }

    /// Write the packaged file into a fresh host directory for bind-mounting
    async fn stage(&self, packaged: &PackagedCode) -> Result<(TempDir, PathBuf)> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("lambdalite-");
            builder
        };
        let staging = match &self.config.staging_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| FaasError::Infrastructure(format!("Failed to create staging dir: {}", e)))?;

        tokio::fs::write(staging.path().join(&packaged.file_name), &packaged.contents)
            .await
            .map_err(|e| FaasError::Infrastructure(format!("Failed to stage code: {}", e)))?;

        // bind mounts need an absolute host path
        let mount = tokio::fs::canonicalize(staging.path())
            .await
            .map_err(|e| FaasError::Infrastructure(format!("Failed to resolve staging dir: {}", e)))?;

        Ok((staging, mount))
    }

    async fn sample_usage(&self, container_id: &str) -> ResourceUsage {
        match self.runtime.sample_usage(container_id).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to sample resource usage");
                ResourceUsage::default()
            }
        }
    }

    /// Delete the delivered file; false if the environment can't be trusted clean
    async fn remove_delivered(&self, container_id: &str, packaged: &PackagedCode) -> bool {
        match self
            .runtime
            .exec(container_id, packaged.cleanup_command(&self.config.work_dir))
            .await
        {
            Ok(output) => output.exit_code.unwrap_or(0) == 0,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to remove delivered code");
                false
            }
        }
    }

    /// Release back to the pool, or terminate if the pool will not take it
    async fn settle(&self, env: ExecutionEnvironment) {
        if let Err(env) = self.pool.release(env) {
            self.pool.terminate(env).await;
        }
    }

    /// Terminate and, for pooled environments, top the key back up in the background
    async fn discard(&self, env: ExecutionEnvironment) {
        let pooled = env.is_pool_owned();
        let (language, selector) = (env.language(), env.runtime());
        self.pool.terminate(env).await;

        if pooled && self.config.replenish_on_discard {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.replenish(language, selector).await;
            });
        }
    }
}
