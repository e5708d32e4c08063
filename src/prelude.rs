//! Prelude module for convenient imports.

pub use crate::error::{PlaygroundError, Result};
pub use crate::playground::{
    config::PlaygroundConfig,
    executor::Playground,
    limits::ExecutionLimits,
    output::{OutputKind, OutputLine},
    serializer::{Data, DataType},
    session::{LiveSession, RunState},
};
