//! # JavaScript Playground Sandbox
//!
//! Runs user-typed JavaScript snippets in isolated Boa realms and reports
//! what they printed as structured, renderer-ready output lines.
//!
//! Every run gets a fresh realm, a fresh output buffer and fresh resource
//! guards:
//!
//! - **Auto-logging**: bare expression statements are logged as if wrapped
//!   in `console.log`
//! - **Timeout protection**: evaluation is raced against a wall-clock budget
//! - **Loop and recursion guards**: injected loop guards, `depthCheck` and the
//!   engine's own limits stop runaway code
//! - **Array guard**: oversized `new Array(n)` allocations are rejected
//! - **Modules**: `require('name')` is served from a package CDN with a
//!   fallback mirror, fetched before the run starts
//!
//! ## Example
//!
//! ```rust,no_run
//! use js_playground_sandbox_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let playground = Playground::new(PlaygroundConfig::default())?;
//!     let lines = playground.execute("const xs = [1, 2, 3];\nxs.map(x => x * 2)").await;
//!
//!     assert_eq!(lines.len(), 1);
//!     assert_eq!(lines[0].kind, OutputKind::Log);
//!     assert_eq!(lines[0].data[0].kind, DataType::Array);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Model
//!
//! A run never returns an error to the host. Lines logged before a failure
//! are kept and exactly one `error` line is appended, whose data is
//! `{"name": <kind>, "message": <text>}`. See [`PlaygroundError::kind`] for
//! the names.

pub mod error;
pub mod prelude;
pub mod playground;

// Re-export main types at crate root for convenience
pub use error::{PlaygroundError, Result};
pub use playground::cache::ModuleCache;
pub use playground::config::{PlaygroundConfig, PlaygroundConfigBuilder};
pub use playground::executor::Playground;
pub use playground::limits::ExecutionLimits;
pub use playground::loader::{HttpFetcher, ModuleFetcher, ModuleLoader};
pub use playground::output::{OutputCollector, OutputKind, OutputLine};
pub use playground::realm::{Binding, ExecutionContext, Script};
pub use playground::serializer::{Data, DataType, Serializer};
pub use playground::session::{LiveSession, RunState};
