/// Metrics Recorder
///
/// Appends one immutable record per invocation and answers the two queries
/// the API exposes: latest record of a function, and per (function, runtime)
/// aggregates. Recording never fails an invocation; persistence errors are
/// logged and dropped.
use async_trait::async_trait;
use lambdalite_common::redis as store;
use lambdalite_common::types::{MetricsRecord, MetricsSummary, RuntimeSelector};
use lambdalite_common::{FaasError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Append-only backing store for metrics records
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append(&self, record: &MetricsRecord) -> Result<()>;

    async fn latest(&self, function_name: &str) -> Result<Option<MetricsRecord>>;

    /// Every record, oldest first
    async fn all(&self) -> Result<Vec<MetricsRecord>>;
}

/// Redis list + per-function latest key
#[derive(Clone)]
pub struct RedisMetricsStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisMetricsStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        info!(url = %redis_url, "Connected to metrics store");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MetricsStore for RedisMetricsStore {
    async fn append(&self, record: &MetricsRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        store::append_record(&mut conn, record).await?;
        Ok(())
    }

    async fn latest(&self, function_name: &str) -> Result<Option<MetricsRecord>> {
        let mut conn = self.conn.clone();
        Ok(store::latest_record(&mut conn, function_name).await?)
    }

    async fn all(&self) -> Result<Vec<MetricsRecord>> {
        let mut conn = self.conn.clone();
        Ok(store::all_records(&mut conn).await?)
    }
}

/// Process-local store; lost on exit
#[derive(Default)]
pub struct InMemoryMetricsStore {
    records: RwLock<Vec<MetricsRecord>>,
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn append(&self, record: &MetricsRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn latest(&self, function_name: &str) -> Result<Option<MetricsRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .find(|r| r.function_name == function_name)
            .cloned())
    }

    async fn all(&self) -> Result<Vec<MetricsRecord>> {
        Ok(self.records.read().await.clone())
    }
}

#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricsStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMetricsStore::default()))
    }

    /// Redis when a URL is configured, otherwise process-local
    pub async fn connect(redis_url: Option<&str>) -> Result<Self> {
        match redis_url {
            Some(url) => Ok(Self::new(Arc::new(RedisMetricsStore::connect(url).await?))),
            None => {
                info!("No REDIS_URL set; metrics kept in memory");
                Ok(Self::in_memory())
            }
        }
    }

    /// Persist one record; failures are logged, never returned
    pub async fn record(&self, record: &MetricsRecord) {
        match self.store.append(record).await {
            Ok(()) => debug!(
                function = %record.function_name,
                runtime = %record.runtime,
                response_time = record.response_time_seconds,
                error = record.error,
                "Metrics recorded"
            ),
            Err(e) => error!(
                function = %record.function_name,
                error = %e,
                "Failed to persist metrics record"
            ),
        }
    }

    pub async fn most_recent(&self, function_name: &str) -> Result<MetricsRecord> {
        self.store
            .latest(function_name)
            .await?
            .ok_or_else(|| FaasError::NotFound(format!("no metrics for function '{}'", function_name)))
    }

    pub async fn aggregate(&self) -> Result<Vec<MetricsSummary>> {
        let records = self.store.all().await?;
        Ok(summarize(&records))
    }
}

#[derive(Default)]
struct Totals {
    response_time: f64,
    memory_mb: f64,
    cpu_percent: f64,
    errors: u64,
    count: u64,
}

/// Group by (function, runtime) and average; sorted by function then runtime
pub fn summarize(records: &[MetricsRecord]) -> Vec<MetricsSummary> {
    let mut groups: BTreeMap<(&str, RuntimeSelector), Totals> = BTreeMap::new();

    for record in records {
        let totals = groups
            .entry((record.function_name.as_str(), record.runtime))
            .or_default();
        totals.response_time += record.response_time_seconds;
        totals.memory_mb += record.memory_usage_mb;
        totals.cpu_percent += record.cpu_usage_percent;
        totals.errors += u64::from(record.error);
        totals.count += 1;
    }

    groups
        .into_iter()
        .map(|((function_name, runtime), totals)| {
            let n = totals.count as f64;
            MetricsSummary {
                function_name: function_name.to_string(),
                runtime,
                avg_response_time: totals.response_time / n,
                error_count: totals.errors,
                avg_memory_mb: totals.memory_mb / n,
                avg_cpu_percent: totals.cpu_percent / n,
                invocations: totals.count,
            }
        })
        .collect()
}
