//! Example of a live session re-running code as it is typed.
//!
//! Run with: cargo run --example live_session
//!
//! Edits arrive faster than the debounce interval, so only the last one runs.

use std::time::Duration;

use js_playground_sandbox_rs::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = PlaygroundConfig::builder()
        .debounce(Duration::from_millis(300))
        .build();
    let session = LiveSession::new(Playground::new(config)?);
    let mut output = session.subscribe();

    let keystrokes = ["con", "const x", "const x = 4", "const x = 42;\nx * 2"];
    for source in keystrokes {
        session.edit(source);
        println!("edit -> {:?}", session.state());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if output.changed().await.is_ok() {
        let lines = output.borrow_and_update().clone();
        match serde_json::to_string_pretty(&lines) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to encode output: {e}"),
        }
    }
    println!("final state: {:?}", session.state());

    Ok(())
}
