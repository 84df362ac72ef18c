//! Context spawner / bridge between callers and worker processes.
//!
//! Each non-debug invocation spawns one worker process (a re-exec of the
//! host executable in worker mode), hands it the startup data over stdin,
//! and settles the caller's future from the first outcome frame on stdout
//! or, failing that, from the exit status. Workers are never pooled and
//! cannot be cancelled short of the optional timeout.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::protocol::{self, Outcome, StartupData};
use crate::registry::{self, ModuleExports};

/// Set on every spawned worker; marks the process as running in worker mode.
pub const WORKER_ENV: &str = "OFFLOAD_WORKER";

/// Overrides the worker executable. Defaults to the current executable.
pub const WORKER_PATH_ENV: &str = "OFFLOAD_WORKER_PATH";

/// Extra arguments appended to the worker command line, whitespace-split.
/// Test harnesses use this to route the re-exec to their worker entry test.
pub const WORKER_ARGS_ENV: &str = "OFFLOAD_WORKER_ARGS";

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Kill the worker and fail the call if no outcome arrives in time.
    /// `None` lets a hung target function hang the call indefinitely.
    pub timeout: Option<Duration>,
}

/// Invoke `module.method(args)`, isolated or direct per the module's
/// registered debug flag.
pub async fn invoke(
    module: &str,
    method: &str,
    args: Vec<Value>,
    options: &InvokeOptions,
) -> Result<Value> {
    let Some((exports, debug_mode)) = registry::lookup(module) else {
        return Err(Error::ModuleNotFound(module.to_string()));
    };

    if debug_mode {
        return invoke_direct(&exports, method, args).await;
    }

    let startup = StartupData {
        module: module.to_string(),
        method: method.to_string(),
        args,
    };

    match options.timeout {
        None => run_worker(startup).await,
        Some(limit) => match tokio::time::timeout(limit, run_worker(startup)).await {
            Ok(result) => result,
            Err(_) => {
                // Dropping the in-flight future kills the worker (kill_on_drop).
                tracing::warn!(module, method, ?limit, "worker timed out");
                Err(Error::Timeout(limit))
            }
        },
    }
}

/// Debug shortcut: call the handler in the caller's own process.
///
/// The failure text is normalized so debug and isolated invocations report
/// the same error for the same handler failure.
async fn invoke_direct(exports: &ModuleExports, method: &str, args: Vec<Value>) -> Result<Value> {
    let handler = exports.method(method).ok_or_else(|| Error::MethodNotFound {
        module: exports.name().to_string(),
        method: method.to_string(),
    })?;
    handler(args)
        .await
        .map_err(|e| Error::Execution(e.to_string()))
}

/// Spawn one worker, feed it the startup data, and settle from its signals.
async fn run_worker(startup: StartupData) -> Result<Value> {
    let program = worker_program()?;

    tracing::debug!(
        module = %startup.module,
        method = %startup.method,
        program = %program.display(),
        "spawning worker"
    );

    let mut child = Command::new(&program)
        .args(worker_args())
        .env(WORKER_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit()) // worker logging passes through
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Ipc(format!("failed to spawn worker '{}': {e}", program.display())))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Ipc("failed to open worker stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Ipc("failed to open worker stdout".to_string()))?;

    let frame = protocol::encode_frame(&startup)?;
    stdin
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| Error::Ipc(format!("failed to write startup data: {e}")))?;
    drop(stdin); // close the pipe so the worker sees end of input

    // Drain stdout before reaping; the first outcome frame wins.
    let mut lines = BufReader::new(stdout).lines();
    let mut outcome: Option<Outcome> = None;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Ipc(format!("failed to read worker output: {e}")))?
    {
        if outcome.is_none() {
            if let Some(parsed) = protocol::parse_frame::<Outcome>(&line) {
                outcome = Some(parsed?);
            }
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Ipc(format!("failed to wait for worker: {e}")))?;

    settle(outcome, status)
}

/// Settlement rules, exactly one path per invocation:
/// an outcome frame beats the exit status; without a frame, a zero exit is a
/// defensive empty success and a nonzero exit is an error naming the status.
fn settle(outcome: Option<Outcome>, status: ExitStatus) -> Result<Value> {
    match outcome {
        Some(Outcome {
            error: false,
            message,
        }) => Ok(message),
        Some(outcome) => Err(Error::Execution(outcome.detail_text())),
        None if status.success() => Ok(Value::Null),
        None => Err(Error::WorkerExit {
            status: status.to_string(),
        }),
    }
}

/// Resolve the worker executable: env override first, then the current
/// executable.
fn worker_program() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(WORKER_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    std::env::current_exe()
        .map_err(|e| Error::Ipc(format!("failed to resolve worker executable: {e}")))
}

fn worker_args() -> Vec<String> {
    std::env::var(WORKER_ARGS_ENV)
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
