// Docker-backed container runtime using Bollard
use super::{append_capped, ContainerRuntime, ContainerSpec, ProcessOutput, MAX_CAPTURED_BYTES};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use lambdalite_common::types::ResourceUsage;
use lambdalite_common::{FaasError, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Container runtime talking to the local Docker daemon
///
/// The isolation runtime (`runc`, `runsc`, ...) is picked per container via
/// `HostConfig.runtime`, so one daemon serves both selectors.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| infra("Failed to connect to Docker daemon", e))?;
        Ok(Self { docker })
    }

    /// Streams keep draining past the cap so the process never blocks on a full pipe
    fn collect_log(output: LogOutput, process: &mut ProcessOutput) {
        match output {
            LogOutput::StdOut { message } => {
                append_capped(&mut process.stdout, &message, MAX_CAPTURED_BYTES);
            }
            LogOutput::StdErr { message } => {
                append_capped(&mut process.stderr, &message, MAX_CAPTURED_BYTES);
            }
            _ => {}
        }
    }
}

fn infra(context: &str, e: impl std::fmt::Display) -> FaasError {
    FaasError::Infrastructure(format!("{}: {}", context, e))
}

/// 404 (no such container) and 409 (not running) mean there is nothing left to stop
fn is_gone(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError { status_code: 404, .. }
            | BollardError::DockerResponseServerError { status_code: 409, .. }
    )
}

/// Tar archive holding a single regular file, as expected by the build and
/// upload endpoints
pub(crate) fn single_file_archive(file_name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, file_name, contents)?;
    builder.into_inner()
}

/// CPU percent using the daemon's formula: (Δcontainer / Δsystem) × cpus × 100
pub fn cpu_percent(total: u64, pre_total: u64, system: u64, pre_system: u64, online_cpus: u64) -> f64 {
    let cpu_delta = total.saturating_sub(pre_total) as f64;
    let system_delta = system.saturating_sub(pre_system) as f64;

    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }
    cpu_delta / system_delta * online_cpus.max(1) as f64 * 100.0
}

fn usage_from_stats(stats: &Stats) -> ResourceUsage {
    let online_cpus = stats
        .cpu_stats
        .online_cpus
        .or_else(|| {
            stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64)
        })
        .unwrap_or(1);

    ResourceUsage {
        memory_mb: stats.memory_stats.usage.unwrap_or(0) as f64 / (1024.0 * 1024.0),
        cpu_percent: cpu_percent(
            stats.cpu_stats.cpu_usage.total_usage,
            stats.precpu_stats.cpu_usage.total_usage,
            stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
        ),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| infra("Docker is not running or accessible", e))
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(infra(&format!("Failed to inspect image '{}'", tag), e)),
        }
    }

    async fn build_image(&self, recipe: &Path, tag: &str) -> Result<()> {
        let dockerfile = tokio::fs::read(recipe).await.map_err(|e| {
            FaasError::ImageBuild(format!("recipe {} unreadable: {}", recipe.display(), e))
        })?;
        let context = single_file_archive("Dockerfile", &dockerfile)
            .map_err(|e| FaasError::ImageBuild(format!("failed to pack build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        info!(image = %tag, recipe = %recipe.display(), "Building image");
        let mut stream = self.docker.build_image(options, None, Some(context.into()));

        while let Some(item) = stream.next().await {
            let build_info = item.map_err(|e| FaasError::ImageBuild(format!("{}: {}", tag, e)))?;
            if let Some(error) = build_info.error {
                return Err(FaasError::ImageBuild(format!("{}: {}", tag, error)));
            }
            if let Some(line) = build_info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(image = %tag, "{}", line);
                }
            }
        }

        info!(image = %tag, "Image built");
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<String> {
        let binds = spec
            .mount
            .as_ref()
            .map(|host| vec![format!("{}:{}:ro", host.display(), spec.working_dir)]);

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            entrypoint: Some(vec![]),
            working_dir: Some(spec.working_dir.clone()),
            labels: Some(spec.labels.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(HostConfig {
                runtime: Some(spec.runtime.clone()),
                memory: Some(spec.memory_limit_bytes),
                nano_cpus: Some(spec.nano_cpus),
                binds,
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| infra("Failed to create container", e))?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // never leave a created-but-dead container behind
            if let Err(cleanup) = self.remove(&container.id).await {
                warn!(container_id = %container.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(infra(&format!("Failed to start container under '{}'", spec.runtime), e));
        }

        debug!(container_id = %container.id, name = %spec.name, runtime = %spec.runtime, "Container started");
        Ok(container.id)
    }

    async fn copy_file(&self, container_id: &str, dir: &str, file_name: &str, contents: &[u8]) -> Result<()> {
        let archive = single_file_archive(file_name, contents)
            .map_err(|e| infra("Failed to pack source archive", e))?;

        let options = UploadToContainerOptions {
            path: dir.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| infra("Failed to copy source into container", e))
    }

    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<ProcessOutput> {
        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| infra("Failed to create exec", e))?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .map_err(|e| infra("Failed to start exec", e))?;

        let mut process = ProcessOutput::default();
        match started {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    let log_output = msg.map_err(|e| infra("Failed to read exec output", e))?;
                    Self::collect_log(log_output, &mut process);
                }
            }
            StartExecResults::Detached => {
                return Err(FaasError::Infrastructure("Failed to attach to exec".to_string()));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| infra("Failed to inspect exec", e))?;
        process.exit_code = inspect.exit_code;

        Ok(process)
    }

    async fn wait(&self, container_id: &str) -> Result<ProcessOutput> {
        let mut process = ProcessOutput::default();

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(item) = logs_stream.next().await {
            let log_output = item.map_err(|e| infra("Failed to read container logs", e))?;
            Self::collect_log(log_output, &mut process);
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        match wait_stream.next().await {
            Some(Ok(response)) => process.exit_code = Some(response.status_code),
            // non-zero exits arrive as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => {
                process.exit_code = Some(code)
            }
            Some(Err(e)) => return Err(infra("Failed to wait for container", e)),
            None => warn!(container_id = %container_id, "No wait response from container"),
        }

        Ok(process)
    }

    async fn sample_usage(&self, container_id: &str) -> Result<ResourceUsage> {
        // one_shot=false lets the daemon fill precpu_stats so the CPU delta is meaningful
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.docker.stats(container_id, Some(options));
        match stream.next().await {
            Some(Ok(stats)) => Ok(usage_from_stats(&stats)),
            Some(Err(e)) => Err(infra("Failed to sample container stats", e)),
            None => Err(FaasError::Infrastructure(format!(
                "No stats returned for container {}",
                container_id
            ))),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(infra("Failed to kill container", e)),
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(infra("Failed to remove container", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::OUTPUT_TRUNCATED;

    #[test]
    fn test_cpu_percent_formula() {
        // 2% of one CPU's share on a 4-CPU host over the sample window
        let pct = cpu_percent(1_200, 1_000, 20_000, 10_000, 4);
        assert!((pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_percent_without_previous_sample() {
        assert_eq!(cpu_percent(1_000, 0, 0, 0, 2), 0.0);
        assert_eq!(cpu_percent(1_000, 1_000, 5_000, 1_000, 2), 0.0);
    }

    #[test]
    fn test_collect_log_caps_streams() {
        let mut process = ProcessOutput::default();
        for _ in 0..40 {
            let message = vec![b'x'; 64 * 1024].into();
            DockerRuntime::collect_log(LogOutput::StdOut { message }, &mut process);
        }
        let message = b"warn".to_vec().into();
        DockerRuntime::collect_log(LogOutput::StdErr { message }, &mut process);

        assert_eq!(process.stdout.len(), MAX_CAPTURED_BYTES + OUTPUT_TRUNCATED.len());
        assert!(process.stdout.ends_with(OUTPUT_TRUNCATED));
        assert_eq!(process.stderr, "warn");
    }

    #[test]
    fn test_single_file_archive_round_trip() {
        let bytes = single_file_archive("abc.py", b"print('hi')").unwrap();
        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
        let mut entries = archive.entries().unwrap();

        let (path, size) = {
            let entry = entries.next().unwrap().unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            (path, entry.header().size().unwrap())
        };
        assert_eq!(path, "abc.py");
        assert_eq!(size, 11);
        assert!(entries.next().is_none());
    }
}
