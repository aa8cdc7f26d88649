use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FaasError, Result};

pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

/// Strongly-typed language enum
///
/// Every per-language detail (file extension, image tag, recipe location,
/// interpreter command) hangs off the variant, so adding a language means
/// adding a variant here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Node,
}

impl Language {
    /// Returns all language variants
    pub fn all_variants() -> &'static [Language] {
        &[Language::Python, Language::Node]
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Node => "js",
        }
    }

    /// Tag of the execution image built for this language
    pub fn image_tag(&self) -> &'static str {
        match self {
            Language::Python => "code-runner-python",
            Language::Node => "code-runner-node",
        }
    }

    /// Directory (under the recipe root) holding this language's Dockerfile
    pub fn recipe_dir(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
        }
    }

    /// Shell command running `file_name` from the working directory
    pub fn run_command(&self, file_name: &str) -> String {
        match self {
            Language::Python => format!("python3 -u {}", file_name),
            Language::Node => format!("node {}", file_name),
        }
    }

    /// Whether submitted code gets the `handler(event)` invocation trailer
    pub fn wraps_handler(&self) -> bool {
        matches!(self, Language::Python)
    }
}

impl FromStr for Language {
    type Err = FaasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "node" => Ok(Language::Node),
            _ => Err(FaasError::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Node => write!(f, "node"),
        }
    }
}

/// Isolation runtime a container is started under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSelector {
    #[serde(alias = "runc")]
    Standard,
    #[serde(alias = "runsc")]
    Sandboxed,
}

impl RuntimeSelector {
    pub fn all_variants() -> &'static [RuntimeSelector] {
        &[RuntimeSelector::Standard, RuntimeSelector::Sandboxed]
    }
}

impl FromStr for RuntimeSelector {
    type Err = FaasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "runc" => Ok(RuntimeSelector::Standard),
            "sandboxed" | "runsc" => Ok(RuntimeSelector::Sandboxed),
            _ => Err(FaasError::UnsupportedRuntime(s.to_string())),
        }
    }
}

impl fmt::Display for RuntimeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeSelector::Standard => write!(f, "standard"),
            RuntimeSelector::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

/// Function definition as handed over by the registry (read-only here)
///
/// `language` stays a string so that unknown languages surface as
/// `UnsupportedLanguage` from the engine rather than as a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub language: String,
    pub timeout_seconds: u64,
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeSelector,
    pub source_code: String,
}

fn default_runtime() -> RuntimeSelector {
    RuntimeSelector::Standard
}

impl FunctionSpec {
    /// Check every precondition that can be decided without touching a container
    pub fn validate(&self) -> Result<Language> {
        let language = self.language.parse::<Language>()?;
        if self.source_code.trim().is_empty() {
            return Err(FaasError::NoCodeProvided);
        }
        if self.source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(FaasError::SourceTooLarge {
                size: self.source_code.len(),
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        if self.timeout_seconds == 0 {
            return Err(FaasError::InvalidTimeout(self.timeout_seconds));
        }
        Ok(language)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Same function, pinned to another runtime
    pub fn with_runtime(&self, runtime: RuntimeSelector) -> Self {
        Self {
            runtime,
            ..self.clone()
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Completed,
    Failed,
    TimedOut,
}

/// Point-in-time resource sample of a running container
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

/// Result of one invocation
///
/// `output` is the trimmed stdout when it has content, otherwise the trimmed
/// stderr (or the timeout/failure message). `error` is set when the run
/// timed out, failed, or only wrote to stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub function_name: String,
    pub language: Language,
    pub runtime: RuntimeSelector,
    pub status: InvocationStatus,
    pub output: String,
    pub response_time_seconds: f64,
    pub error: bool,
    pub stdout: String,
    pub stderr: String,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    /// Cold-started environments exit before usage can be sampled and report zero
    pub cold_start: bool,
}

impl InvocationResult {
    /// Turn an unsuccessful run into the matching error variant
    pub fn into_error_outcome(self) -> Result<InvocationResult> {
        match self.status {
            InvocationStatus::TimedOut => Err(FaasError::ExecutionTimeout(self.output)),
            InvocationStatus::Failed => Err(FaasError::ExecutionFailed(self.output)),
            InvocationStatus::Completed => Ok(self),
        }
    }

    pub fn to_record(&self) -> MetricsRecord {
        MetricsRecord {
            function_name: self.function_name.clone(),
            runtime: self.runtime,
            response_time_seconds: self.response_time_seconds,
            error: self.error,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            memory_usage_mb: self.memory_usage_mb,
            cpu_usage_percent: self.cpu_usage_percent,
            language: Some(self.language),
            status: Some(self.status),
            cold_start: Some(self.cold_start),
            recorded_at: Some(Utc::now()),
        }
    }
}

/// One row of the append-only metrics table
///
/// Columns after `cpu_usage_percent` were added later and default to `None`
/// when older rows are read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub function_name: String,
    pub runtime: RuntimeSelector,
    pub response_time_seconds: f64,
    #[serde(with = "error_flag")]
    pub error: bool,
    pub stdout: String,
    pub stderr: String,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub status: Option<InvocationStatus>,
    #[serde(default)]
    pub cold_start: Option<bool>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Aggregate over all records of one (function, runtime) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub function_name: String,
    pub runtime: RuntimeSelector,
    pub avg_response_time: f64,
    pub error_count: u64,
    pub avg_memory_mb: f64,
    pub avg_cpu_percent: f64,
    pub invocations: u64,
}

/// Same submission run once per runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub standard: InvocationResult,
    pub sandboxed: InvocationResult,
}

/// The error column is stored as integer 0|1; older rows may hold a bool.
mod error_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*flag))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Flag {
            Int(u64),
            Bool(bool),
        }

        Ok(match Flag::deserialize(deserializer)? {
            Flag::Int(n) => n != 0,
            Flag::Bool(b) => b,
        })
    }
}
