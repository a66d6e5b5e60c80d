//! Built-in jobs available to every `lockstep` config.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use lockstep_core::{
    FnJob, Job, JobMetadata, JobParameterMetadata, JobParams, JobResult, ParamType,
};
use serde_json::Value;
use tracing::info;

pub fn builtin() -> Vec<Arc<dyn Job>> {
    vec![echo(), sleep(), command()]
}

/// Logs `message` and succeeds with it.
fn echo() -> Arc<dyn Job> {
    let metadata = JobMetadata::new("echo").with_param(
        JobParameterMetadata::new("message", ParamType::String).with_default("hello"),
    );
    Arc::new(FnJob::new(metadata, |params: &JobParams| {
        let message = string_param(params, "message").unwrap_or_default();
        info!(message = %message, "echo");
        Ok(Some(JobResult::success_with(message)))
    }))
}

fn sleep() -> Arc<dyn Job> {
    let metadata = JobMetadata::new("sleep")
        .with_param(JobParameterMetadata::new("duration", ParamType::Duration).with_default("1s"))
        .serial();
    Arc::new(FnJob::new(metadata, |params: &JobParams| {
        let ms = params
            .get("duration")
            .and_then(Value::as_u64)
            .context("parameter 'duration' must be a duration")?;
        std::thread::sleep(Duration::from_millis(ms));
        Ok(Some(JobResult::success_with(format!("slept {ms}ms"))))
    }))
}

/// Runs `cmd` through `sh -c`. A non-zero exit fails the job with the
/// command's stderr.
fn command() -> Arc<dyn Job> {
    let metadata = JobMetadata::new("command")
        .with_param(JobParameterMetadata::new("cmd", ParamType::String))
        .serial();
    Arc::new(FnJob::new(metadata, |params: &JobParams| {
        let Some(cmd) = string_param(params, "cmd") else {
            bail!("parameter 'cmd' is required");
        };
        let output = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .output()
            .with_context(|| format!("failed to spawn `{cmd}`"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(Some(JobResult::success_with(stdout)));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let status = match output.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        };
        Ok(Some(JobResult::failure(format!("`{cmd}` failed ({status}): {stderr}"))))
    }))
}

fn string_param(params: &JobParams, name: &str) -> Option<String> {
    match params.get(name)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
