//! Playground module containing all execution-related components.

pub mod cache;
pub mod config;
pub mod console;
pub mod executor;
pub mod instrument;
pub(crate) mod js;
pub mod limits;
pub mod loader;
pub mod output;
pub mod realm;
pub mod serializer;
pub mod session;
pub mod table;
