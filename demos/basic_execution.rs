//! Basic example of running JavaScript snippets in the playground.
//!
//! Run with: cargo run --example basic_execution
//!
//! Set `RUST_LOG=debug` to see each stage of a run.

use js_playground_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = PlaygroundConfig::default();
    println!("Limits for this host: {:?}", config.execution_limits());

    let playground = Playground::new(config)?;

    let snippets = [
        ("Expressions", "1 + 1\n'hello'\n[1, 2, 3].map(x => x * 2)"),
        ("Objects", "const user = { name: 'ann', tags: new Set(['a', 'b']) };\nuser"),
        (
            "Console",
            "console.log('log', 1);\nconsole.warn('careful');\nconsole.table([{ a: 1 }, { a: 2, b: 3 }])",
        ),
        ("Thrown error", "console.log('before');\nnull.boom"),
        ("Runaway loop", "while (true) {}"),
        ("Module", "const pad = require('left-pad');\npad('7', 3, '0')"),
    ];

    for (title, source) in snippets {
        println!("\n=== {title} ===");
        for line in playground.execute(source).await {
            let data: Vec<&str> = line.data.iter().map(|data| data.value.as_str()).collect();
            println!("[{:?}] {}", line.kind, data.join(" "));
        }
    }

    Ok(())
}
