//! Worker-side bootstrap.
//!
//! Runs inside a spawned worker process: reads the startup frame from stdin,
//! resolves the target handler in the registry (rebuilt by the worker running
//! the same registration code as its parent), dispatches it under a
//! supervising task, posts exactly one outcome frame to stdout, and exits.
//! Stdout belongs to the protocol; all logging goes to stderr.
//!
//! One invocation moves through validating, resolving and dispatching, then
//! terminates with exit code 0 after a success outcome and 1 after a failure.
//! Nothing is retried.

use std::io::{BufRead, Write};

use serde_json::Value;

use crate::bridge::WORKER_ENV;
use crate::error::Error;
use crate::protocol::{self, Outcome, StartupData};
use crate::registry::{self, Handler};

/// True when this process was spawned as a worker.
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some_and(|value| value == "1")
}

/// Hand control to the worker bootstrap when running in worker mode.
///
/// Hosts call this early in `main`, after their modules have registered and
/// outside any async runtime; in a worker process it never returns.
pub fn init() {
    if is_worker() {
        run_and_exit();
    }
}

/// Run the bootstrap against stdin/stdout and exit with the outcome code.
pub fn run_and_exit() -> ! {
    init_logging();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let code = run(&mut stdin.lock(), &mut stdout.lock());
    std::process::exit(code);
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    // A subscriber the host already installed wins. Stderr only: stdout
    // carries protocol frames.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Execute one invocation and report it; returns the process exit code.
fn run<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> i32 {
    let outcome = execute(input);
    if outcome.error {
        tracing::error!(detail = %outcome.detail_text(), "error in worker");
    }
    let code = i32::from(outcome.error);
    if protocol::write_frame(output, &outcome).is_err() {
        // The outcome could not be delivered; the exit status is all the
        // parent will see.
        return 1;
    }
    code
}

/// Validate the startup data, resolve the handler, dispatch it.
fn execute<R: BufRead>(input: &mut R) -> Outcome {
    let startup: StartupData = match protocol::read_frame(input) {
        Ok(Some(startup)) => startup,
        Ok(None) => {
            return Outcome::failure(
                Error::InvalidStartupData("no startup frame received".to_string()).to_string(),
            );
        }
        Err(e) => return Outcome::failure(Error::InvalidStartupData(e.to_string()).to_string()),
    };

    if startup.module.is_empty() || startup.method.is_empty() {
        return Outcome::failure(
            Error::InvalidStartupData(
                "it must contain \"module\" (the registered module name) \
                 and \"method\" (the method to call)"
                    .to_string(),
            )
            .to_string(),
        );
    }

    let Some((exports, _)) = registry::lookup(&startup.module) else {
        return Outcome::failure(Error::ModuleNotFound(startup.module).to_string());
    };

    let Some(handler) = exports.method(&startup.method) else {
        return Outcome::failure(
            Error::MethodNotFound {
                module: startup.module,
                method: startup.method,
            }
            .to_string(),
        );
    };

    dispatch(handler, startup.args)
}

/// Dispatch under a supervising task so handler errors and panics normalize
/// into the same failure outcome.
fn dispatch(handler: Handler, args: Vec<Value>) -> Outcome {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return Outcome::failure(format!("failed to start worker runtime: {e}")),
    };

    let supervised = runtime.block_on(async move { tokio::spawn(handler(args)).await });

    match supervised {
        Ok(Ok(value)) => Outcome::success(value),
        Ok(Err(e)) => Outcome::failure(e.to_string()),
        Err(join_error) => match join_error.try_into_panic() {
            Ok(payload) => Outcome::failure(format!("panic in worker: {}", panic_text(&*payload))),
            Err(join_error) => Outcome::failure(format!("worker task failed: {join_error}")),
        },
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::registry::{ModuleExports, RegisterOptions, register};

    // Plain #[test] throughout: `dispatch` builds its own runtime.

    fn run_startup(startup: &StartupData) -> (Outcome, i32) {
        let frame = protocol::encode_frame(startup).unwrap();
        run_raw(frame.into_bytes())
    }

    fn run_raw(input: Vec<u8>) -> (Outcome, i32) {
        let mut output = Vec::new();
        let code = run(&mut Cursor::new(input), &mut output);
        let text = String::from_utf8(output).unwrap();
        let outcome = text
            .lines()
            .find_map(protocol::parse_frame::<Outcome>)
            .expect("worker must post an outcome frame")
            .unwrap();
        (outcome, code)
    }

    fn startup(module: &str, method: &str, args: Vec<Value>) -> StartupData {
        StartupData {
            module: module.to_string(),
            method: method.to_string(),
            args,
        }
    }

    #[test]
    fn missing_startup_frame_fails() {
        let (outcome, code) = run_raw(b"no frame at all\n".to_vec());
        assert!(outcome.error);
        assert!(outcome.detail_text().contains("invalid startup data"));
        assert_eq!(code, 1);
    }

    #[test]
    fn blank_method_fails_validation() {
        let (outcome, code) = run_startup(&startup("somewhere", "", Vec::new()));
        assert!(outcome.error);
        assert!(outcome.detail_text().contains("invalid startup data"));
        assert_eq!(code, 1);
    }

    #[test]
    fn unregistered_module_fails() {
        let (outcome, code) = run_startup(&startup("worker_tests_nowhere", "any", Vec::new()));
        assert!(outcome.error);
        assert!(outcome.detail_text().contains("worker_tests_nowhere"));
        assert!(outcome.detail_text().contains("not registered"));
        assert_eq!(code, 1);
    }

    #[test]
    fn unknown_method_fails() {
        register(
            ModuleExports::new("worker_tests_known").export("ping", |_args| Ok(json!("pong"))),
            RegisterOptions::default(),
        );
        let (outcome, code) = run_startup(&startup("worker_tests_known", "absent", Vec::new()));
        assert!(outcome.error);
        assert!(outcome.detail_text().contains("absent"));
        assert!(outcome.detail_text().contains("not found"));
        assert_eq!(code, 1);
    }

    #[test]
    fn successful_dispatch_posts_the_value() {
        register(
            ModuleExports::new("worker_tests_math").export("add", |args| {
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            }),
            RegisterOptions::default(),
        );
        let (outcome, code) =
            run_startup(&startup("worker_tests_math", "add", vec![json!(2), json!(3)]));
        assert!(!outcome.error);
        assert_eq!(outcome.message, json!(5));
        assert_eq!(code, 0);
    }

    #[test]
    fn async_handlers_are_awaited() {
        register(
            ModuleExports::new("worker_tests_async").export_async("late", |args| async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            }),
            RegisterOptions::default(),
        );
        let (outcome, code) =
            run_startup(&startup("worker_tests_async", "late", vec![json!("done")]));
        assert!(!outcome.error);
        assert_eq!(outcome.message, json!("done"));
        assert_eq!(code, 0);
    }

    #[test]
    fn handler_error_becomes_failure_detail() {
        register(
            ModuleExports::new("worker_tests_err")
                .export("boom", |_args| Err(crate::error::HandlerError::new("boom"))),
            RegisterOptions::default(),
        );
        let (outcome, code) = run_startup(&startup("worker_tests_err", "boom", Vec::new()));
        assert!(outcome.error);
        assert_eq!(outcome.detail_text(), "boom");
        assert_eq!(code, 1);
    }

    #[test]
    fn formatted_panic_payloads_keep_their_text() {
        register(
            ModuleExports::new("worker_tests_panic_fmt").export(
                "explode",
                |_args| -> std::result::Result<Value, crate::error::HandlerError> {
                    panic!("exploded after {} steps", 3)
                },
            ),
            RegisterOptions::default(),
        );
        let (outcome, code) =
            run_startup(&startup("worker_tests_panic_fmt", "explode", Vec::new()));
        assert!(outcome.error);
        assert_eq!(outcome.detail_text(), "panic in worker: exploded after 3 steps");
        assert_eq!(code, 1);
    }

    #[test]
    fn panic_is_captured_by_the_supervising_task() {
        register(
            ModuleExports::new("worker_tests_panic").export("explode", |_args| -> std::result::Result<Value, crate::error::HandlerError> {
                panic!("kaboom")
            }),
            RegisterOptions::default(),
        );
        let (outcome, code) = run_startup(&startup("worker_tests_panic", "explode", Vec::new()));
        assert!(outcome.error);
        assert!(outcome.detail_text().contains("panic"));
        assert!(outcome.detail_text().contains("kaboom"));
        assert_eq!(code, 1);
    }
}
