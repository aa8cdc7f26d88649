// In-memory container runtime for unit tests
//
// Containers are plain records; `exec`/`wait` answer from one scripted
// behaviour, so tests can describe "what the code does" without a Docker
// daemon.
use super::{ContainerRuntime, ContainerSpec, ProcessOutput};
use async_trait::async_trait;
use lambdalite_common::types::ResourceUsage;
use lambdalite_common::{FaasError, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What a piece of submitted code does when run
#[derive(Debug, Clone)]
pub enum Behaviour {
    Output { stdout: String, stderr: String, exit_code: i64 },
    Sleep(Duration),
    Crash(String),
}

impl Behaviour {
    pub fn stdout(text: &str) -> Self {
        Behaviour::Output { stdout: text.to_string(), stderr: String::new(), exit_code: 0 }
    }

    pub fn stderr(text: &str, exit_code: i64) -> Self {
        Behaviour::Output { stdout: String::new(), stderr: text.to_string(), exit_code }
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub files: HashMap<String, Vec<u8>>,
    pub running: bool,
}

#[derive(Default)]
pub struct ScriptedRuntime {
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    /// Every spec ever started, in order
    pub started: Mutex<Vec<ContainerSpec>>,
    pub images: Mutex<HashSet<String>>,
    pub builds: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub killed: Mutex<Vec<String>>,
    /// Default behaviour of any code run
    pub behaviour: Mutex<Option<Behaviour>>,
    pub usage: ResourceUsage,
    pub fail_start: Mutex<bool>,
    pub fail_build: Mutex<bool>,
    pub fail_copy: Mutex<bool>,
    /// Delay between creating a container and `start_container` returning
    pub start_delay: Mutex<Option<Duration>>,
    /// Reject `start_container` after this many successful starts
    pub start_budget: Mutex<Option<usize>>,
    next_id: AtomicUsize,
    pub running_execs: AtomicUsize,
    pub peak_execs: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            usage: ResourceUsage { memory_mb: 12.5, cpu_percent: 3.0 },
            ..Default::default()
        }
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        let runtime = Self::new();
        *runtime.behaviour.lock().unwrap() = Some(behaviour);
        runtime
    }

    pub fn with_images(self, tags: &[&str]) -> Self {
        self.images.lock().unwrap().extend(tags.iter().map(|t| t.to_string()));
        self
    }

    pub fn live_containers(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    async fn run_behaviour(&self) -> Result<ProcessOutput> {
        let behaviour = self
            .behaviour
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Behaviour::stdout(""));

        let running = self.running_execs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_execs.fetch_max(running, Ordering::SeqCst);

        let result = match behaviour {
            Behaviour::Output { stdout, stderr, exit_code } => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(ProcessOutput { stdout, stderr, exit_code: Some(exit_code) })
            }
            Behaviour::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ProcessOutput { exit_code: Some(0), ..Default::default() })
            }
            Behaviour::Crash(reason) => Err(FaasError::Infrastructure(reason)),
        };

        self.running_execs.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.images.lock().unwrap().contains(tag))
    }

    async fn build_image(&self, recipe: &Path, tag: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_build.lock().unwrap() {
            return Err(FaasError::ImageBuild(format!("{}: exit status 1", tag)));
        }
        if !recipe.exists() {
            return Err(FaasError::ImageBuild(format!("recipe {} unreadable", recipe.display())));
        }
        self.builds.lock().unwrap().push(tag.to_string());
        self.images.lock().unwrap().insert(tag.to_string());
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_start.lock().unwrap() {
            return Err(FaasError::Infrastructure("Failed to start container".to_string()));
        }
        {
            let mut budget = self.start_budget.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(FaasError::Infrastructure("start budget exhausted".to_string()));
                }
                *remaining -= 1;
            }
        }

        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.started.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().insert(
            id.clone(),
            FakeContainer { spec: spec.clone(), files: HashMap::new(), running: true },
        );

        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(id)
    }

    async fn copy_file(&self, container_id: &str, dir: &str, file_name: &str, contents: &[u8]) -> Result<()> {
        if *self.fail_copy.lock().unwrap() {
            return Err(FaasError::Infrastructure("Failed to copy source into container".to_string()));
        }
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| FaasError::Infrastructure(format!("no such container {}", container_id)))?;
        container.files.insert(format!("{}/{}", dir, file_name), contents.to_vec());
        Ok(())
    }

    async fn exec(&self, container_id: &str, command: Vec<String>) -> Result<ProcessOutput> {
        // file cleanup commands are answered immediately
        if let Some(script) = command.last() {
            if let Some(path) = script.strip_prefix("rm -f ") {
                if let Some(container) = self.containers.lock().unwrap().get_mut(container_id) {
                    container.files.remove(path);
                }
                return Ok(ProcessOutput { exit_code: Some(0), ..Default::default() });
            }
        }
        if !self.containers.lock().unwrap().contains_key(container_id) {
            return Err(FaasError::Infrastructure(format!("no such container {}", container_id)));
        }
        self.run_behaviour().await
    }

    async fn wait(&self, container_id: &str) -> Result<ProcessOutput> {
        let output = self.run_behaviour().await;
        if let Some(container) = self.containers.lock().unwrap().get_mut(container_id) {
            container.running = false;
        }
        output
    }

    async fn sample_usage(&self, _container_id: &str) -> Result<ResourceUsage> {
        Ok(self.usage)
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        self.killed.lock().unwrap().push(container_id.to_string());
        if let Some(container) = self.containers.lock().unwrap().get_mut(container_id) {
            container.running = false;
        }
        Ok(())
    }

    /// Like Docker, accepts either the id or the container name
    async fn remove(&self, container_id: &str) -> Result<()> {
        self.containers
            .lock()
            .unwrap()
            .retain(|id, container| id != container_id && container.spec.name != container_id);
        self.removed.lock().unwrap().push(container_id.to_string());
        Ok(())
    }
}
