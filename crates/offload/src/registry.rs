//! Process-wide module registry.
//!
//! Instead of re-loading modules from the filesystem, exported functions are
//! registered under a stable module name. A worker process runs the same
//! registration code as its parent, so looking the name up inside the worker
//! yields a fresh, independent copy of the module with no shared state.
//!
//! Registration is idempotent: re-registering a name overwrites the previous
//! entry, and the most recent debug flag governs calls through any handle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, RwLock};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::bridge::{self, InvokeOptions};
use crate::error::{HandlerError, Result};

/// An exported method: plain-data arguments in, plain-data value or failure
/// detail out.
pub type Handler = Arc<
    dyn Fn(Vec<Value>) -> BoxFuture<'static, std::result::Result<Value, HandlerError>>
        + Send
        + Sync,
>;

/// The exported surface of one module.
pub struct ModuleExports {
    name: String,
    methods: HashMap<String, Handler>,
}

impl ModuleExports {
    /// Start building the exports of the module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// The module name this table registers under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Export a synchronous method.
    ///
    /// The body runs inside the supervising task of the worker (or inline in
    /// debug mode), so panics are captured either way.
    pub fn export<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.methods.insert(
            method.into(),
            Arc::new(move |args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler(args) })
            }),
        );
        self
    }

    /// Export an asynchronous method.
    pub fn export_async<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, HandlerError>> + Send + 'static,
    {
        self.methods
            .insert(method.into(), Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    /// Look up an exported method.
    pub(crate) fn method(&self, name: &str) -> Option<Handler> {
        self.methods.get(name).cloned()
    }
}

struct Registration {
    exports: Arc<ModuleExports>,
    debug_mode: bool,
}

static REGISTRY: LazyLock<RwLock<HashMap<String, Registration>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Options for [`register`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Call methods directly in the caller's process, skipping isolation.
    /// Useful for simpler stack traces during development.
    pub debug_mode: bool,
}

/// Register a module's exports for worker execution.
///
/// Returns the handle through which the module's methods are invoked; this
/// is the sole public invocation surface. Registrations live for the process
/// lifetime; there is no unregister.
pub fn register(exports: ModuleExports, options: RegisterOptions) -> ModuleHandle {
    let module = exports.name().to_string();
    tracing::info!(
        module = %module,
        debug_mode = options.debug_mode,
        "module registered for worker execution"
    );

    let mut registry = REGISTRY.write().unwrap();
    registry.insert(
        module.clone(),
        Registration {
            exports: Arc::new(exports),
            debug_mode: options.debug_mode,
        },
    );
    drop(registry);

    ModuleHandle { module }
}

/// Look up a registered module and its current debug flag.
pub(crate) fn lookup(module: &str) -> Option<(Arc<ModuleExports>, bool)> {
    let registry = REGISTRY.read().unwrap();
    registry
        .get(module)
        .map(|registration| (Arc::clone(&registration.exports), registration.debug_mode))
}

/// Entry point attached by [`register`].
///
/// Stateless per call: it captures only the module name, and reads the debug
/// flag from the registry at call time so a later re-registration governs
/// earlier handles.
#[derive(Debug, Clone)]
pub struct ModuleHandle {
    module: String,
}

impl ModuleHandle {
    /// The registered module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Invoke an exported method in an isolated worker process, resolving
    /// with its return value or failing with the relayed error detail.
    pub async fn exec_in_worker(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.exec_in_worker_with(method, args, &InvokeOptions::default())
            .await
    }

    /// Like [`exec_in_worker`](Self::exec_in_worker) with per-call options.
    pub async fn exec_in_worker_with(
        &self,
        method: &str,
        args: Vec<Value>,
        options: &InvokeOptions,
    ) -> Result<Value> {
        bridge::invoke(&self.module, method, args, options).await
    }
}
