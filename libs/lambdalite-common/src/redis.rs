use crate::types::MetricsRecord;
use redis::{AsyncCommands, RedisResult};

/// Redis layout of the metrics table - defines only key semantics and
/// record encoding, so the API and the CLI never drift

/// Append-only list of every record; list order is insertion order
pub const METRICS_LOG_KEY: &str = "lambdalite:metrics";
pub const LATEST_PREFIX: &str = "lambdalite:metrics:latest";

/// Key holding the most recent record of a function
pub fn latest_key(function_name: &str) -> String {
    format!("{}:{}", LATEST_PREFIX, function_name)
}

fn encode(record: &MetricsRecord) -> RedisResult<String> {
    serde_json::to_string(record)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string())))
}

fn decode(payload: &str) -> RedisResult<MetricsRecord> {
    serde_json::from_str(payload)
        .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string())))
}

/// Append a record and update the function's latest pointer in one MULTI
pub async fn append_record(
    conn: &mut redis::aio::ConnectionManager,
    record: &MetricsRecord,
) -> RedisResult<()> {
    let payload = encode(record)?;

    redis::pipe()
        .atomic()
        .rpush(METRICS_LOG_KEY, &payload)
        .ignore()
        .set(latest_key(&record.function_name), &payload)
        .ignore()
        .query_async::<_, ()>(conn)
        .await
}

/// Most recent record of a function, if any was ever written
pub async fn latest_record(
    conn: &mut redis::aio::ConnectionManager,
    function_name: &str,
) -> RedisResult<Option<MetricsRecord>> {
    let payload: Option<String> = conn.get(latest_key(function_name)).await?;

    match payload {
        Some(data) => Ok(Some(decode(&data)?)),
        None => Ok(None),
    }
}

/// Every record in insertion order
pub async fn all_records(
    conn: &mut redis::aio::ConnectionManager,
) -> RedisResult<Vec<MetricsRecord>> {
    let payloads: Vec<String> = conn.lrange(METRICS_LOG_KEY, 0, -1).await?;
    payloads.iter().map(|p| decode(p)).collect()
}
