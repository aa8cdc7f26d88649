/// Container Runtime - the only seam between the engine and the outside world
///
/// **Capabilities the engine relies on:**
/// 1. Check whether a tagged image exists
/// 2. Build an image from a recipe
/// 3. Start a container under a chosen isolation runtime with memory/CPU limits
/// 4. Copy a file into a running container (or mount a host dir at start)
/// 5. Execute a shell command inside a running container
/// 6. Sample point-in-time memory/CPU usage
/// 7. Kill and remove a container
///
/// Deadlines are NOT part of this contract: the orchestrator wraps `exec` and
/// `wait` in `tokio::time::timeout` and kills the container itself.
use async_trait::async_trait;
use lambdalite_common::types::ResourceUsage;
use lambdalite_common::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod docker;
#[cfg(test)]
pub mod scripted;

pub use docker::DockerRuntime;

/// Everything needed to create and start one container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Docker runtime name (`runc`, `runsc`, ...)
    pub runtime: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub memory_limit_bytes: i64,
    pub nano_cpus: i64,
    pub network_disabled: bool,
    /// Host directory bind-mounted read-only at `working_dir`
    pub mount: Option<PathBuf>,
    pub labels: HashMap<String, String>,
}

pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024; // 1MB per stream
pub const OUTPUT_TRUNCATED: &str = "\n[output truncated]";

/// Captured output of a finished process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

/// Append a raw chunk to a captured stream without letting it grow past
/// `limit`. Bytes past the limit are dropped and the marker is added once.
pub fn append_capped(buf: &mut String, chunk: &[u8], limit: usize) {
    if buf.len() >= limit {
        if !buf.ends_with(OUTPUT_TRUNCATED) {
            buf.push_str(OUTPUT_TRUNCATED);
        }
        return;
    }

    let room = limit - buf.len();
    if chunk.len() <= room {
        buf.push_str(&String::from_utf8_lossy(chunk));
    } else {
        buf.push_str(&String::from_utf8_lossy(&chunk[..room]));
        buf.push_str(OUTPUT_TRUNCATED);
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pre-flight reachability check
    async fn ping(&self) -> Result<()>;

    async fn image_exists(&self, tag: &str) -> Result<bool>;

    /// Build `tag` from the Dockerfile at `recipe`; `ImageBuild` on failure
    async fn build_image(&self, recipe: &Path, tag: &str) -> Result<()>;

    /// Create and start a container, returning its id
    async fn start_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Place `contents` at `{dir}/{file_name}` inside a running container
    async fn copy_file(&self, container_id: &str, dir: &str, file_name: &str, contents: &[u8]) -> Result<()>;

    /// Run `command` in a running container and collect its output
    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<ProcessOutput>;

    /// Follow the main process of a started container until it exits
    async fn wait(&self, container_id: &str) -> Result<ProcessOutput>;

    async fn sample_usage(&self, container_id: &str) -> Result<ResourceUsage>;

    async fn kill(&self, container_id: &str) -> Result<()>;

    /// Force-remove a container whatever its state
    async fn remove(&self, container_id: &str) -> Result<()>;
}
