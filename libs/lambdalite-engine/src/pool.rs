/// Warm Pool Manager
///
/// Keeps already-running idle containers per (language, runtime) so the
/// invocation path can skip container start-up. Each key has its own lock;
/// acquire/release/prewarm only ever touch the idle list under that lock,
/// and environments move by value, so one environment can never be handed
/// to two invocations.
///
/// Container start and termination happen outside the lock.
use crate::config::EngineConfig;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use lambdalite_common::types::{Language, RuntimeSelector};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub type PoolKey = (Language, RuntimeSelector);

/// Keeps a pooled container's main process alive without doing anything
const IDLE_COMMAND: &str = "while true; do sleep 3600; done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Started by prewarm/replenish; may return to the pool
    Pooled,
    /// Started for a single invocation; always terminated afterwards
    ColdStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Idle,
    InUse,
    Terminated,
}

/// One live container. Deliberately not `Clone`: whoever holds it owns it.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    id: String,
    language: Language,
    runtime: RuntimeSelector,
    origin: Origin,
    state: EnvironmentState,
}

impl ExecutionEnvironment {
    fn pooled(id: String, language: Language, runtime: RuntimeSelector) -> Self {
        Self {
            id,
            language,
            runtime,
            origin: Origin::Pooled,
            state: EnvironmentState::Idle,
        }
    }

    /// A single-use environment, in use from the moment it exists
    pub(crate) fn cold_started(id: String, language: Language, runtime: RuntimeSelector) -> Self {
        Self {
            id,
            language,
            runtime,
            origin: Origin::ColdStart,
            state: EnvironmentState::InUse,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn runtime(&self) -> RuntimeSelector {
        self.runtime
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    pub fn is_pool_owned(&self) -> bool {
        self.origin == Origin::Pooled
    }

    fn key(&self) -> PoolKey {
        (self.language, self.runtime)
    }
}

#[derive(Debug, Default)]
struct Slot {
    idle: Vec<ExecutionEnvironment>,
    /// Size the key was last prewarmed to; replenish tops up to this
    target: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotStats {
    pub language: Language,
    pub runtime: RuntimeSelector,
    pub idle: usize,
    pub target: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub slots: Vec<SlotStats>,
    pub hits: u64,
    pub misses: u64,
}

/// Base container definition shared by pooled and cold-started containers
pub(crate) fn container_spec(
    config: &EngineConfig,
    language: Language,
    runtime: RuntimeSelector,
    origin: Origin,
) -> ContainerSpec {
    let tag = match origin {
        Origin::Pooled => "warm",
        Origin::ColdStart => "cold",
    };
    let short_id = uuid::Uuid::new_v4().simple().to_string();

    let labels = HashMap::from([
        ("lambdalite.pool".to_string(), tag.to_string()),
        ("lambdalite.language".to_string(), language.to_string()),
        ("lambdalite.runtime".to_string(), runtime.to_string()),
    ]);

    ContainerSpec {
        name: format!("lambdalite-{}-{}-{}-{}", tag, language, runtime, &short_id[..12]),
        image: language.image_tag().to_string(),
        runtime: config.runtime_name(runtime).to_string(),
        command: Vec::new(),
        working_dir: config.work_dir.clone(),
        memory_limit_bytes: config.memory_limit_bytes(),
        nano_cpus: config.nano_cpus(),
        network_disabled: config.network_disabled,
        mount: None,
        labels,
    }
}

pub struct WarmPool {
    runtime: Arc<dyn ContainerRuntime>,
    config: EngineConfig,
    slots: HashMap<PoolKey, Mutex<Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WarmPool {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        let mut slots = HashMap::new();
        for language in Language::all_variants() {
            for selector in RuntimeSelector::all_variants() {
                slots.insert((*language, *selector), Mutex::new(Slot::default()));
            }
        }

        Self {
            runtime,
            config,
            slots,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: PoolKey) -> MutexGuard<'_, Slot> {
        // every key is inserted in `new`; a poisoned lock only means a panic
        // elsewhere while holding it, and the idle list itself stays valid
        let slot = self
            .slots
            .get(&key)
            .unwrap_or_else(|| unreachable!("pool key {:?} not initialised", key));
        slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start `count` idle environments for a key. Individual start failures are
    /// logged and skipped; returns how many were added.
    pub async fn prewarm(&self, language: Language, runtime: RuntimeSelector, count: usize) -> usize {
        {
            let mut slot = self.slot((language, runtime));
            slot.target = count.min(self.config.max_idle);
        }

        let mut added = 0;
        for _ in 0..count {
            if self.idle_count(language, runtime) >= self.config.max_idle {
                break;
            }
            if self.start_idle(language, runtime).await {
                added += 1;
            }
        }

        info!(language = %language, runtime = %runtime, requested = count, added, "Prewarmed containers");
        added
    }

    /// Prewarm every (language, runtime) key to the configured pool size
    pub async fn prewarm_all(&self) -> usize {
        let mut added = 0;
        for language in Language::all_variants() {
            for selector in RuntimeSelector::all_variants() {
                added += self.prewarm(*language, *selector, self.config.pool_size).await;
            }
        }
        added
    }

    async fn start_idle(&self, language: Language, runtime: RuntimeSelector) -> bool {
        let mut spec = container_spec(&self.config, language, runtime, Origin::Pooled);
        spec.command = vec!["sh".to_string(), "-c".to_string(), IDLE_COMMAND.to_string()];

        match self.runtime.start_container(&spec).await {
            Ok(id) => {
                debug!(container_id = %id, language = %language, runtime = %runtime, "Warm container started");
                let env = ExecutionEnvironment::pooled(id, language, runtime);
                let overflow = {
                    let mut slot = self.slot((language, runtime));
                    if slot.idle.len() < self.config.max_idle {
                        slot.idle.push(env);
                        None
                    } else {
                        Some(env)
                    }
                };
                match overflow {
                    None => true,
                    Some(env) => {
                        self.terminate(env).await;
                        false
                    }
                }
            }
            Err(e) => {
                warn!(language = %language, runtime = %runtime, error = %e, "Failed to prewarm container");
                false
            }
        }
    }

    /// Pop an idle environment, or `None` when the caller has to cold-start
    pub fn acquire(&self, language: Language, runtime: RuntimeSelector) -> Option<ExecutionEnvironment> {
        let env = self.slot((language, runtime)).idle.pop();

        match env {
            Some(mut env) => {
                env.state = EnvironmentState::InUse;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(container_id = %env.id, language = %language, runtime = %runtime, "Warm pool hit");
                Some(env)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(language = %language, runtime = %runtime, "Warm pool miss");
                None
            }
        }
    }

    /// Return a cleanly finished pool-owned environment for reuse.
    ///
    /// Hands the environment back when the pool cannot take it (cold-started,
    /// not in use, or key already full); the caller must then terminate it.
    pub fn release(&self, mut env: ExecutionEnvironment) -> Result<(), ExecutionEnvironment> {
        if !env.is_pool_owned() || env.state != EnvironmentState::InUse {
            return Err(env);
        }

        let mut slot = self.slot(env.key());
        if slot.idle.len() >= self.config.max_idle {
            drop(slot);
            return Err(env);
        }

        env.state = EnvironmentState::Idle;
        debug!(container_id = %env.id, "Environment released to pool");
        slot.idle.push(env);
        Ok(())
    }

    /// Kill and remove an environment; failures are logged, the handle is gone either way
    pub async fn terminate(&self, mut env: ExecutionEnvironment) {
        if let Err(e) = self.runtime.kill(&env.id).await {
            warn!(container_id = %env.id, error = %e, "Failed to kill container");
        }
        if let Err(e) = self.runtime.remove(&env.id).await {
            warn!(container_id = %env.id, error = %e, "Failed to remove container");
        }
        env.state = EnvironmentState::Terminated;
        debug!(container_id = %env.id, origin = ?env.origin, "Environment terminated");
    }

    /// Top a key back up to its prewarm target; best effort
    pub async fn replenish(&self, language: Language, runtime: RuntimeSelector) -> usize {
        let deficit = {
            let slot = self.slot((language, runtime));
            slot.target.saturating_sub(slot.idle.len())
        };

        let mut added = 0;
        for _ in 0..deficit {
            if self.start_idle(language, runtime).await {
                added += 1;
            }
        }
        if added > 0 {
            debug!(language = %language, runtime = %runtime, added, "Pool replenished");
        }
        added
    }

    /// Terminate every idle environment (shutdown path)
    pub async fn drain(&self) -> usize {
        let mut drained = Vec::new();
        for key in self.slots.keys() {
            let mut slot = self.slot(*key);
            slot.target = 0;
            drained.append(&mut slot.idle);
        }

        let count = drained.len();
        for env in drained {
            self.terminate(env).await;
        }
        info!(count, "Warm pool drained");
        count
    }

    pub fn idle_count(&self, language: Language, runtime: RuntimeSelector) -> usize {
        self.slot((language, runtime)).idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let mut slots: Vec<SlotStats> = self
            .slots
            .keys()
            .map(|&(language, runtime)| {
                let slot = self.slot((language, runtime));
                SlotStats {
                    language,
                    runtime,
                    idle: slot.idle.len(),
                    target: slot.target,
                }
            })
            .collect();
        slots.sort_by_key(|s| (s.language, s.runtime));

        PoolStats {
            slots,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scripted::ScriptedRuntime;
    use std::collections::HashSet;
    use std::time::Duration;

    fn pool_with(runtime: Arc<ScriptedRuntime>, max_idle: usize) -> Arc<WarmPool> {
        let config = EngineConfig {
            pool_size: max_idle,
            max_idle,
            ..Default::default()
        };
        Arc::new(WarmPool::new(runtime, config))
    }

    #[tokio::test]
    async fn test_prewarm_and_acquire() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime.clone(), 3);

        let added = pool.prewarm(Language::Python, RuntimeSelector::Standard, 3).await;
        assert_eq!(added, 3);
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Standard), 3);
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Sandboxed), 0);

        let env = pool.acquire(Language::Python, RuntimeSelector::Standard).unwrap();
        assert_eq!(env.state(), EnvironmentState::InUse);
        assert!(env.is_pool_owned());
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Standard), 2);

        let spec = runtime.containers.lock().unwrap()[env.id()].spec.clone();
        assert_eq!(spec.runtime, "runc");
        assert_eq!(spec.labels["lambdalite.pool"], "warm");
        assert!(spec.command[2].contains("sleep"));
    }

    #[tokio::test]
    async fn test_acquire_on_empty_key_is_miss() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, 2);

        assert!(pool.acquire(Language::Node, RuntimeSelector::Sandboxed).is_none());
        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_partial_prewarm_is_not_fatal() {
        let runtime = Arc::new(ScriptedRuntime::new());
        *runtime.start_budget.lock().unwrap() = Some(1);
        let pool = pool_with(runtime, 3);

        let added = pool.prewarm(Language::Node, RuntimeSelector::Standard, 3).await;
        assert_eq!(added, 1);
        assert_eq!(pool.idle_count(Language::Node, RuntimeSelector::Standard), 1);
    }

    #[tokio::test]
    async fn test_release_makes_environment_reusable() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, 1);
        pool.prewarm(Language::Python, RuntimeSelector::Sandboxed, 1).await;

        let env = pool.acquire(Language::Python, RuntimeSelector::Sandboxed).unwrap();
        let id = env.id().to_string();
        pool.release(env).unwrap();

        let again = pool.acquire(Language::Python, RuntimeSelector::Sandboxed).unwrap();
        assert_eq!(again.id(), id);
    }

    #[tokio::test]
    async fn test_release_rejects_cold_started_environment() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, 2);

        let env = ExecutionEnvironment::cold_started(
            "ctr-cold".to_string(),
            Language::Node,
            RuntimeSelector::Standard,
        );
        let rejected = pool.release(env).unwrap_err();
        assert_eq!(rejected.origin(), Origin::ColdStart);
        assert_eq!(pool.idle_count(Language::Node, RuntimeSelector::Standard), 0);
    }

    #[tokio::test]
    async fn test_release_into_full_key_is_rejected() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, 1);
        pool.prewarm(Language::Python, RuntimeSelector::Standard, 1).await;

        let env = pool.acquire(Language::Python, RuntimeSelector::Standard).unwrap();
        pool.prewarm(Language::Python, RuntimeSelector::Standard, 1).await;

        assert!(pool.release(env).is_err());
    }

    #[tokio::test]
    async fn test_terminate_kills_and_removes() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime.clone(), 1);
        pool.prewarm(Language::Node, RuntimeSelector::Standard, 1).await;

        let env = pool.acquire(Language::Node, RuntimeSelector::Standard).unwrap();
        let id = env.id().to_string();
        pool.terminate(env).await;

        assert_eq!(runtime.killed.lock().unwrap().as_slice(), &[id.clone()]);
        assert_eq!(runtime.removed.lock().unwrap().as_slice(), &[id]);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_replenish_tops_up_to_target() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, 2);
        pool.prewarm(Language::Python, RuntimeSelector::Standard, 2).await;

        let env = pool.acquire(Language::Python, RuntimeSelector::Standard).unwrap();
        pool.terminate(env).await;
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Standard), 1);

        assert_eq!(pool.replenish(Language::Python, RuntimeSelector::Standard).await, 1);
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Standard), 2);
        assert_eq!(pool.replenish(Language::Python, RuntimeSelector::Standard).await, 0);
    }

    #[tokio::test]
    async fn test_drain_terminates_everything() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime.clone(), 2);
        let added = pool.prewarm_all().await;
        assert_eq!(added, 8);

        assert_eq!(pool.drain().await, 8);
        assert_eq!(runtime.live_containers(), 0);
        assert!(pool.stats().slots.iter().all(|s| s.idle == 0 && s.target == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_is_exclusive() {
        const POOL_SIZE: usize = 3;
        const INVOCATIONS: usize = 12;

        let runtime = Arc::new(ScriptedRuntime::new());
        let pool = pool_with(runtime, POOL_SIZE);
        pool.prewarm(Language::Python, RuntimeSelector::Standard, POOL_SIZE).await;

        let in_use: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let peak = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..INVOCATIONS {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let Some(env) = pool.acquire(Language::Python, RuntimeSelector::Standard) else {
                    return false;
                };
                {
                    let mut held = in_use.lock().unwrap();
                    assert!(held.insert(env.id().to_string()), "environment handed out twice");
                    peak.fetch_max(held.len() as u64, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_use.lock().unwrap().remove(env.id());
                pool.release(env).unwrap();
                true
            }));
        }

        let mut pooled = 0;
        for handle in handles {
            if handle.await.unwrap() {
                pooled += 1;
            }
        }

        assert!(pooled >= 1);
        assert!(peak.load(Ordering::SeqCst) <= POOL_SIZE as u64);
        assert_eq!(pool.idle_count(Language::Python, RuntimeSelector::Standard), POOL_SIZE);
    }
}
