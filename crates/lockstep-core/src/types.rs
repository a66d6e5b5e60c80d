use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::future::JobFuture;

/// Resolved, typed parameters handed to a job body.
pub type JobParams = BTreeMap<String, Value>;

/// Type tag of a declared job parameter. Config values always arrive as
/// strings and are converted through this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    /// ISO calendar date, `YYYY-MM-DD`.
    Date,
    /// `"500ms"`, `"5s"`, `"2m"`, `"1h"`, `"1d"` or a bare number of
    /// milliseconds. Stored as milliseconds.
    Duration,
}

impl ParamType {
    /// Convert a raw string into a JSON value of this type.
    pub fn convert(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            ParamType::String => Some(Value::String(raw.to_string())),
            ParamType::Integer => raw.parse::<i64>().ok().map(Value::from),
            ParamType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ParamType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            ParamType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| Value::String(d.to_string())),
            ParamType::Duration => parse_duration_ms(raw).map(Value::from),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Date => "date",
            ParamType::Duration => "duration",
        };
        write!(f, "{s}")
    }
}

fn parse_duration_ms(raw: &str) -> Option<u64> {
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (num, unit) = raw.split_at(split);
    let n: u64 = num.parse().ok()?;
    let factor = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    n.checked_mul(factor)
}

/// One declared parameter of a job: name, type tag and optional default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameterMetadata {
    pub name: String,
    pub param_type: ParamType,
    pub default: Option<String>,
}

impl JobParameterMetadata {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn convert(&self, raw: &str) -> Result<Value> {
        self.param_type
            .convert(raw)
            .ok_or_else(|| CoreError::InvalidParam {
                param: self.name.clone(),
                value: raw.to_string(),
                expected: self.param_type.to_string(),
            })
    }
}

/// Immutable description of a job implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    name: String,
    params: Vec<JobParameterMetadata>,
    /// Set when the job must never run concurrently with itself.
    serial: bool,
}

impl JobMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            serial: false,
        }
    }

    pub fn with_param(mut self, param: JobParameterMetadata) -> Self {
        self.params.push(param);
        self
    }

    /// Mark the job as "never concurrently with itself".
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[JobParameterMetadata] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&JobParameterMetadata> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    /// Defaults of all declared parameters, overlaid with `raw` values.
    ///
    /// Declared parameters are converted through their type; undeclared ones
    /// are passed through as strings.
    pub fn resolve_params(&self, raw: &BTreeMap<String, String>) -> Result<JobParams> {
        let mut resolved = JobParams::new();
        for p in &self.params {
            if let Some(default) = &p.default {
                resolved.insert(p.name.clone(), p.convert(default)?);
            }
        }
        for (name, value) in raw {
            let converted = match self.param(name) {
                Some(p) => p.convert(value)?,
                None => Value::String(value.clone()),
            };
            resolved.insert(name.clone(), converted);
        }
        Ok(resolved)
    }

    /// Convert string values of declared parameters in an already-typed map.
    pub fn convert_params(&self, params: JobParams) -> Result<JobParams> {
        params
            .into_iter()
            .map(|(name, value)| match (self.param(&name), value) {
                (Some(p), Value::String(s)) => Ok((name, p.convert(&s)?)),
                (_, value) => Ok((name, value)),
            })
            .collect()
    }
}

/// Final (or intermediate, for `Yielded`) state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Success,
    Failure,
    PartialSuccess,
    Skipped,
    Unknown,
    /// Not finished; a continuation has been scheduled.
    Yielded,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobOutcome::Success => "SUCCESS",
            JobOutcome::Failure => "FAILURE",
            JobOutcome::PartialSuccess => "PARTIAL_SUCCESS",
            JobOutcome::Skipped => "SKIPPED",
            JobOutcome::Unknown => "UNKNOWN",
            JobOutcome::Yielded => "YIELDED",
        };
        write!(f, "{s}")
    }
}

/// Result of one execution attempt.
///
/// Only `Yielded` results carry a continuation; the constructors enforce it.
#[derive(Debug, Clone)]
pub struct JobResult {
    outcome: JobOutcome,
    message: Option<String>,
    cause: Option<Arc<anyhow::Error>>,
    continuation: Option<JobFuture>,
}

impl JobResult {
    fn of(outcome: JobOutcome, message: Option<String>) -> Self {
        Self {
            outcome,
            message,
            cause: None,
            continuation: None,
        }
    }

    pub fn success() -> Self {
        Self::of(JobOutcome::Success, None)
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self::of(JobOutcome::Success, Some(message.into()))
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::of(JobOutcome::Failure, Some(message.into()))
    }

    /// Failure carrying the error that caused it.
    pub fn failure_from(cause: anyhow::Error) -> Self {
        Self {
            outcome: JobOutcome::Failure,
            message: Some(format!("{cause:#}")),
            cause: Some(Arc::new(cause)),
            continuation: None,
        }
    }

    pub fn partial_success(message: impl Into<String>) -> Self {
        Self::of(JobOutcome::PartialSuccess, Some(message.into()))
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::of(JobOutcome::Skipped, Some(message.into()))
    }

    pub fn unknown() -> Self {
        Self::of(JobOutcome::Unknown, None)
    }

    pub fn unknown_with(message: impl Into<String>) -> Self {
        Self::of(JobOutcome::Unknown, Some(message.into()))
    }

    pub fn yielded(continuation: JobFuture) -> Self {
        Self {
            outcome: JobOutcome::Yielded,
            message: None,
            cause: None,
            continuation: Some(continuation),
        }
    }

    /// Replace the message, keeping outcome and cause.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Turn any result into a failure with `message`, keeping the cause.
    /// Used when a non-success outcome fails an enclosing group.
    pub fn into_failure(mut self, message: impl Into<String>) -> Self {
        self.outcome = JobOutcome::Failure;
        self.message = Some(message.into());
        self.continuation = None;
        self
    }

    pub fn outcome(&self) -> JobOutcome {
        self.outcome
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }

    pub fn continuation(&self) -> Option<&JobFuture> {
        self.continuation.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Success
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{}: {}", self.outcome, m),
            None => write!(f, "{}", self.outcome),
        }
    }
}
