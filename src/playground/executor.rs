//! Core execution engine: one snippet in, one list of output lines out.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{PlaygroundError, Result};
use crate::playground::cache::ModuleCache;
use crate::playground::config::PlaygroundConfig;
use crate::playground::console::ConsoleProxy;
use crate::playground::instrument;
use crate::playground::limits::{ExecutionLimits, ResourceLimiter};
use crate::playground::loader::{extract_module_requests, HttpFetcher, ModuleFetcher, ModuleLoader};
use crate::playground::output::{OutputCollector, OutputLine};
use crate::playground::realm::{Binding, ExecutionContext, RealmOptions, Script};
use crate::playground::serializer::Serializer;

/// Runs snippets in fresh realms.
///
/// Each call to [`Playground::execute`] gets its own realm, collector and
/// guards. Only the module cache is shared between runs.
#[derive(Debug)]
pub struct Playground<F = HttpFetcher> {
    config: PlaygroundConfig,
    loader: ModuleLoader<F>,
}

impl Playground<HttpFetcher> {
    /// Create a playground that fetches modules over HTTP.
    pub fn new(config: PlaygroundConfig) -> Result<Self> {
        let loader = ModuleLoader::http(&config, Arc::new(ModuleCache::new()))?;
        Ok(Self { config, loader })
    }
}

impl<F: ModuleFetcher> Playground<F> {
    /// Create a playground with a custom module fetcher.
    pub fn with_fetcher(config: PlaygroundConfig, fetcher: F) -> Self {
        let loader = ModuleLoader::new(fetcher, Arc::new(ModuleCache::new()), &config);
        Self { config, loader }
    }

    /// The configuration of this playground.
    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    /// The module cache shared by all runs.
    pub fn module_cache(&self) -> &Arc<ModuleCache> {
        self.loader.resolver().cache()
    }

    /// Run a snippet and return everything it printed.
    ///
    /// A failed run still returns the lines logged before the failure,
    /// followed by exactly one `error` line describing it.
    pub async fn execute(&self, source: &str) -> Vec<OutputLine> {
        let started = Instant::now();
        let output = OutputCollector::new();
        let outcome = self.run(source, &output).await;
        if let Err(err) = &outcome {
            debug!(kind = err.kind(), error = %err, "run failed");
            output.push(OutputLine::failure(err));
        }
        let lines = output.take();
        info!(
            lines = lines.len(),
            success = outcome.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        lines
    }

    /// Run a snippet, writing console output into `output`.
    pub async fn run(&self, source: &str, output: &OutputCollector) -> Result<()> {
        let limits = self.config.execution_limits();
        debug!(?limits, "starting run");

        self.loader
            .preload_all(&extract_module_requests(source))
            .await?;

        let script = Script::new(instrument::prepare(source));
        let limiter = ResourceLimiter::new(limits);
        let context = self.execution_context(output, &limiter);
        self.evaluate(script, context, &limiter, limits).await
    }

    fn execution_context(&self, output: &OutputCollector, limiter: &ResourceLimiter) -> ExecutionContext {
        let serializer = Serializer::new(self.config.max_depth, self.config.console_max_length);
        let console = ConsoleProxy::new(output.clone(), serializer);

        let mut context = ExecutionContext::new();
        context.add_property("console", console.binding());
        limiter.install(&mut context);
        context.add_property("moduleCache", self.loader.resolver().binding());
        context.add_property("process", json!({ "env": { "NODE_ENV": "production" } }));
        context
    }

    async fn evaluate(
        &self,
        script: Script,
        mut context: ExecutionContext,
        limiter: &ResourceLimiter,
        limits: ExecutionLimits,
    ) -> Result<()> {
        let options = RealmOptions::from_limits(&limits);
        let exec_handle = tokio::task::spawn_blocking(move || {
            script.run_in_context_with(&mut context, &options).map(|_: Binding| ())
        });

        // Race between evaluation and timeout
        tokio::select! {
            result = exec_handle => match result {
                Ok(inner_result) => inner_result,
                Err(e) => Err(PlaygroundError::ExecutionFailed(format!("task panicked: {e}"))),
            },
            _ = tokio::time::sleep(limits.timeout) => {
                limiter.abort_handle().abort();
                warn!(timeout = ?limits.timeout, "run timed out");
                Err(PlaygroundError::Timeout(limits.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playground::output::OutputKind;
    use crate::playground::serializer::DataType;
    use std::time::Duration;

    struct NoNetwork;

    impl ModuleFetcher for NoNetwork {
        async fn fetch(&self, url: &str) -> anyhow::Result<String> {
            anyhow::bail!("network disabled for {url}")
        }
    }

    fn playground() -> Playground<NoNetwork> {
        Playground::with_fetcher(PlaygroundConfig::default(), NoNetwork)
    }

    #[tokio::test]
    async fn test_auto_logs_expression() {
        let lines = playground().execute("1 + 1").await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, OutputKind::Log);
        assert_eq!(lines[0].data[0].kind, DataType::Number);
        assert_eq!(lines[0].data[0].value, "2");
    }

    #[tokio::test]
    async fn test_failure_appends_one_error_line() {
        let lines = playground()
            .execute("console.log('before');\nthrow new TypeError('boom');")
            .await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, OutputKind::Log);
        assert!(lines[1].is_error());
        let error = lines[1].data[0].parsed().unwrap();
        assert_eq!(error["name"], "RuntimeError");
        assert_eq!(error["message"], "TypeError: boom");
    }

    #[tokio::test]
    async fn test_process_env() {
        let lines = playground().execute("process.env.NODE_ENV").await;
        assert_eq!(lines[0].data[0].parsed().unwrap(), "production");
    }

    #[tokio::test]
    async fn test_missing_module_fails_before_running() {
        let lines = playground()
            .execute("console.log('never');\nconst pad = require('left-pad');")
            .await;
        assert_eq!(lines.len(), 1);
        let error = lines[0].data[0].parsed().unwrap();
        assert_eq!(error["name"], "ModuleResolutionFailure");
    }

    #[tokio::test]
    async fn test_preloaded_module_is_required() {
        let playground = playground();
        playground
            .module_cache()
            .insert("https://unpkg.com/greet", "module.exports = (n) => 'hi ' + n;");
        let lines = playground
            .execute("const greet = require('greet');\ngreet('ann')")
            .await;
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert_eq!(lines[0].data[0].parsed().unwrap(), "hi ann");
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let limits = ExecutionLimits {
            timeout: Duration::from_millis(50),
            max_iterations: u64::MAX / 8,
            max_depth: 80,
            max_array_size: 1_000,
        };
        let config = PlaygroundConfig::builder().limits(limits).build();
        let playground = Playground::with_fetcher(config, NoNetwork);
        let lines = playground
            .execute("console.log('start');\nwhile (true) {}")
            .await;
        assert_eq!(lines.first().map(|line| line.kind), Some(OutputKind::Log));
        let error = lines.last().unwrap().data[0].parsed().unwrap();
        assert_eq!(error["name"], "ExecutionTimeout");
    }
}
