//! Run registered module functions in isolated worker processes.
//!
//! A module registers its exported functions once under a stable name and
//! receives a handle whose methods can then be invoked off the caller's
//! context: each call spawns a worker process (a re-exec of the host
//! executable in worker mode), the worker looks the function up in its own
//! fresh copy of the registry, runs it, and relays the value or the failure
//! text back over a message channel. The call itself stays an ordinary
//! `async` call.
//!
//! ```no_run
//! use offload::{ModuleExports, RegisterOptions, register};
//! use serde_json::{Value, json};
//!
//! fn main() -> offload::Result<()> {
//!     let math = register(
//!         ModuleExports::new("math").export("add", |args| {
//!             let a = args.first().and_then(Value::as_i64).unwrap_or(0);
//!             let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
//!             Ok(json!(a + b))
//!         }),
//!         RegisterOptions::default(),
//!     );
//!
//!     // In a worker process this runs the bootstrap and never returns.
//!     offload::init();
//!
//!     let runtime = tokio::runtime::Builder::new_multi_thread()
//!         .enable_all()
//!         .build()?;
//!     runtime.block_on(async {
//!         let sum = math.exec_in_worker("add", vec![json!(2), json!(3)]).await?;
//!         assert_eq!(sum, json!(5));
//!         Ok(())
//!     })
//! }
//! ```
//!
//! Every invocation gets its own worker process; nothing is pooled or shared
//! between calls, and outcomes arrive in completion order. Registering with
//! `debug_mode: true` skips isolation and calls the handler directly, for
//! simpler stack traces during development.

pub mod bridge;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod worker;

pub use bridge::{InvokeOptions, WORKER_ARGS_ENV, WORKER_ENV, WORKER_PATH_ENV, invoke};
pub use error::{Error, HandlerError, Result};
pub use registry::{ModuleExports, ModuleHandle, RegisterOptions, register};
pub use worker::init;
