//! Module resolution for `require(...)`.
//!
//! Modules are fetched from a package CDN before a run starts, with a
//! fallback mirror, and kept in a [`ModuleCache`]. During the run the
//! `require` shim only ever reads the cache, through [`ModuleResolver`].

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context as _;
use boa_engine::{JsArgs, JsString, JsValue};
use futures::future::join_all;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{PlaygroundError, Result};
use crate::playground::cache::ModuleCache;
use crate::playground::config::PlaygroundConfig;
use crate::playground::js::to_rust_string;
use crate::playground::realm::{Binding, HostFunction};

static REQUIRE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*(?:,\s*['"]([^'"]+)['"]\s*)?\)"#)
        .expect("Invalid regex")
});

/// Version string meaning "no explicit version".
const LATEST: &str = "latest";

/// One `require(...)` call found in source code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRequest {
    pub name: String,
    pub version: Option<String>,
}

impl ModuleRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// All `require(...)` calls in order of appearance, duplicates kept.
pub fn extract_module_requests(source: &str) -> Vec<ModuleRequest> {
    REQUIRE_CALL
        .captures_iter(source)
        .map(|captures| ModuleRequest {
            name: captures[1].to_string(),
            version: captures
                .get(2)
                .map(|version| version.as_str().to_string())
                .filter(|version| version != LATEST),
        })
        .collect()
}

/// Module names of all `require(...)` calls, duplicates kept.
pub fn extract_module_names(source: &str) -> Vec<String> {
    extract_module_requests(source)
        .into_iter()
        .map(|request| request.name)
        .collect()
}

/// Fetches module source text by URL.
pub trait ModuleFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

/// Fetches modules over HTTP. Non-2xx responses are failures.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl ModuleFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Synchronous, cache-only lookup of preloaded modules.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    cache: Arc<ModuleCache>,
    primary_cdn: String,
    fallback_cdn: String,
}

impl ModuleResolver {
    pub fn new(cache: Arc<ModuleCache>, primary_cdn: impl Into<String>, fallback_cdn: impl Into<String>) -> Self {
        Self {
            cache,
            primary_cdn: primary_cdn.into(),
            fallback_cdn: fallback_cdn.into(),
        }
    }

    /// The cache this resolver reads.
    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// URL of a module on the primary CDN.
    pub fn primary_url(&self, name: &str, version: Option<&str>) -> String {
        module_url(&self.primary_cdn, name, version)
    }

    /// URL of a module on the fallback mirror.
    pub fn fallback_url(&self, name: &str, version: Option<&str>) -> String {
        module_url(&self.fallback_cdn, name, version)
    }

    /// Cached source of a module, primary URL first.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Option<Arc<str>> {
        self.cache
            .get(&self.primary_url(name, version))
            .or_else(|| self.cache.get(&self.fallback_url(name, version)))
    }

    /// The `moduleCache` binding used by the `require` shim.
    pub fn binding(&self) -> Binding {
        let resolver = self.clone();
        let resolve = HostFunction::new(move |_this, args, ctx| {
            let name = to_rust_string(args.get_or_undefined(0), ctx)?;
            let version = args.get_or_undefined(1);
            let version = if version.is_undefined() || version.is_null() {
                None
            } else {
                Some(to_rust_string(version, ctx)?)
            };
            let source = resolver.resolve(&name, version.as_deref().filter(|version| *version != LATEST));
            Ok(source
                .map(|source| JsValue::from(JsString::from(&*source)))
                .unwrap_or_else(JsValue::undefined))
        })
        .with_length(2);
        Binding::Namespace(BTreeMap::from([("resolve".to_string(), Binding::Function(resolve))]))
    }
}

fn module_url(base: &str, name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{base}{name}@{version}"),
        None => format!("{base}{name}"),
    }
}

/// `scheme://host[:port]` of a URL, for error messages.
fn origin(url: &str) -> String {
    reqwest::Url::parse(url)
        .map(|parsed| parsed.origin().ascii_serialization())
        .unwrap_or_else(|_| url.to_string())
}

/// Preloads modules into the cache ahead of a run.
#[derive(Debug)]
pub struct ModuleLoader<F = HttpFetcher> {
    fetcher: F,
    resolver: ModuleResolver,
}

impl ModuleLoader<HttpFetcher> {
    /// Create a loader that fetches over HTTP, using the CDNs in `config`.
    pub fn http(config: &PlaygroundConfig, cache: Arc<ModuleCache>) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_timeout)
            .map_err(|err| PlaygroundError::ExecutionFailed(format!("{err:#}")))?;
        Ok(Self::new(fetcher, cache, config))
    }
}

impl<F: ModuleFetcher> ModuleLoader<F> {
    /// Create a loader with a custom fetcher.
    pub fn new(fetcher: F, cache: Arc<ModuleCache>, config: &PlaygroundConfig) -> Self {
        Self {
            fetcher,
            resolver: ModuleResolver::new(cache, &config.primary_cdn, &config.fallback_cdn),
        }
    }

    /// The cache-only resolver over this loader's cache.
    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    /// Make sure a module is cached, trying the fallback mirror on failure.
    pub async fn preload(&self, request: &ModuleRequest) -> Result<Arc<str>> {
        let version = request.version.as_deref();
        let primary_url = self.resolver.primary_url(&request.name, version);
        let primary_error = match self.fetch_cached(&primary_url).await {
            Ok(source) => return Ok(source),
            Err(err) => err,
        };
        warn!(
            module = %request.name,
            error = %format!("{primary_error:#}"),
            "primary CDN failed, trying fallback"
        );

        let fallback_url = self.resolver.fallback_url(&request.name, version);
        self.fetch_cached(&fallback_url)
            .await
            .map_err(|fallback_error| PlaygroundError::ModuleResolution {
                module: request.name.clone(),
                primary_origin: origin(&primary_url),
                primary_error: format!("{primary_error:#}"),
                fallback_origin: origin(&fallback_url),
                fallback_error: format!("{fallback_error:#}"),
            })
    }

    /// Preload every distinct request concurrently.
    ///
    /// Fails with the first failure in request order.
    pub async fn preload_all(&self, requests: &[ModuleRequest]) -> Result<()> {
        let mut seen = HashSet::new();
        let distinct: Vec<&ModuleRequest> = requests
            .iter()
            .filter(|request| seen.insert(*request))
            .collect();
        if distinct.is_empty() {
            return Ok(());
        }
        debug!(count = distinct.len(), cached = self.resolver.cache.len(), "preloading modules");

        let results = join_all(distinct.into_iter().map(|request| self.preload(request))).await;
        results.into_iter().try_for_each(|result| result.map(|_| ()))
    }

    /// Cached source for a module.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Option<Arc<str>> {
        self.resolver.resolve(name, version)
    }

    async fn fetch_cached(&self, url: &str) -> anyhow::Result<Arc<str>> {
        if let Some(source) = self.resolver.cache.get(url) {
            return Ok(source);
        }
        debug!(url, "fetching module");
        let source = self.fetcher.fetch(url).await?;
        Ok(self.resolver.cache.insert(url, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed responses and counts requests.
    #[derive(Default)]
    struct StaticFetcher {
        responses: HashMap<String, String>,
        requests: AtomicUsize,
    }

    impl StaticFetcher {
        fn with(mut self, url: &str, source: &str) -> Self {
            self.responses.insert(url.to_string(), source.to_string());
            self
        }
    }

    impl ModuleFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<String> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found for {url}"))
        }
    }

    fn loader(fetcher: StaticFetcher) -> ModuleLoader<StaticFetcher> {
        ModuleLoader::new(fetcher, Arc::new(ModuleCache::new()), &PlaygroundConfig::default())
    }

    #[test]
    fn test_extract_module_names() {
        let source = r#"const a = require('left-pad'); const b = require("lodash@4.17.21");
            require( 'left-pad' ); const c = require('dayjs', '1.11.0');"#;
        assert_eq!(
            extract_module_names(source),
            vec!["left-pad", "lodash@4.17.21", "left-pad", "dayjs"]
        );
        let requests = extract_module_requests(source);
        assert_eq!(requests[3].version.as_deref(), Some("1.11.0"));
        assert!(extract_module_names("requireSomething(x)").is_empty());
    }

    #[test]
    fn test_module_urls() {
        let resolver = ModuleResolver::new(
            Arc::new(ModuleCache::new()),
            "https://unpkg.com/",
            "https://cdn.jsdelivr.net/npm/",
        );
        assert_eq!(resolver.primary_url("left-pad", None), "https://unpkg.com/left-pad");
        assert_eq!(
            resolver.fallback_url("dayjs", Some("1.11.0")),
            "https://cdn.jsdelivr.net/npm/dayjs@1.11.0"
        );
    }

    #[test]
    fn test_origin() {
        assert_eq!(origin("https://unpkg.com/left-pad"), "https://unpkg.com");
        assert_eq!(origin("http://127.0.0.1:1/x"), "http://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_preload_uses_primary() {
        let loader = loader(StaticFetcher::default().with("https://unpkg.com/a", "exports.a = 1;"));
        let source = loader.preload(&ModuleRequest::new("a")).await.unwrap();
        assert_eq!(&*source, "exports.a = 1;");
        assert_eq!(loader.resolve("a", None).as_deref(), Some("exports.a = 1;"));
    }

    #[tokio::test]
    async fn test_preload_falls_back_to_mirror() {
        let loader = loader(
            StaticFetcher::default().with("https://cdn.jsdelivr.net/npm/a", "exports.mirror = true;"),
        );
        loader.preload(&ModuleRequest::new("a")).await.unwrap();
        assert_eq!(loader.resolve("a", None).as_deref(), Some("exports.mirror = true;"));
    }

    #[tokio::test]
    async fn test_preload_failure_names_both_origins() {
        let loader = loader(StaticFetcher::default());
        let err = loader.preload(&ModuleRequest::new("missing")).await.unwrap_err();
        assert!(err.is_module_resolution());
        let message = err.to_string();
        assert!(message.contains("https://unpkg.com"));
        assert!(message.contains("https://cdn.jsdelivr.net"));
        assert!(message.contains("404 Not Found"));
    }

    #[tokio::test]
    async fn test_cached_urls_are_not_fetched_again() {
        let loader = loader(StaticFetcher::default().with("https://unpkg.com/a", "1"));
        let requests = vec![ModuleRequest::new("a"), ModuleRequest::new("a")];
        loader.preload_all(&requests).await.unwrap();
        loader.preload_all(&requests).await.unwrap();
        assert_eq!(loader.fetcher.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preload_all_reports_failure() {
        let loader = loader(StaticFetcher::default().with("https://unpkg.com/a", "1"));
        let err = loader
            .preload_all(&[ModuleRequest::new("a"), ModuleRequest::new("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, PlaygroundError::ModuleResolution { ref module, .. } if module == "b"));
    }
}
