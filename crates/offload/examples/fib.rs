//! Runs a CPU-heavy function in a worker process without stalling the caller.
//!
//! ```sh
//! cargo run --example fib
//! ```

use offload::{ModuleExports, RegisterOptions, register};
use serde_json::{Value, json};

fn fib(n: u64) -> u64 {
    match n {
        0 | 1 => n,
        _ => fib(n - 1) + fib(n - 2),
    }
}

fn main() -> offload::Result<()> {
    let math = register(
        ModuleExports::new("math").export("fib", |args| {
            let n = args.first().and_then(Value::as_u64).unwrap_or(0);
            Ok(json!(fib(n)))
        }),
        RegisterOptions::default(),
    );

    // Worker processes re-exec this binary; hand them over to the bootstrap
    // before starting the host runtime.
    offload::init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let result = math.exec_in_worker("fib", vec![json!(32)]).await?;
        println!("fib(32) = {result}");
        Ok(())
    })
}
