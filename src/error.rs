//! Error types for the playground sandbox.

use thiserror::Error;

/// Errors that can end a playground run.
///
/// Every variant is converted into exactly one `error` output line by the
/// orchestrator; none of them escapes to the host.
#[derive(Error, Debug)]
pub enum PlaygroundError {
    /// The prepared script could not be parsed.
    #[error("{message}")]
    Syntax {
        /// The parser's message, e.g. `SyntaxError: unexpected token`.
        message: String,
    },

    /// User code threw a value that reached the top level.
    #[error("{exception_type}: {message}")]
    Runtime {
        /// The thrown error's name (e.g. "TypeError"), or "Uncaught" for non-errors.
        exception_type: String,
        /// The error message.
        message: String,
    },

    /// The loop guard fired.
    #[error("Loop iteration limit exceeded")]
    IterationLimitExceeded,

    /// The depth guard or the engine's recursion limit fired.
    #[error("Call stack limit exceeded")]
    CallStackLimitExceeded,

    /// An array construction asked for more elements than allowed.
    #[error("Array size exceeds maximum limit of {limit}")]
    ArraySizeLimitExceeded {
        /// The configured maximum array size.
        limit: u64,
    },

    /// The run did not finish before the timeout.
    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The abort flag was observed by the depth guard.
    #[error("Execution aborted")]
    Aborted,

    /// A required module could not be fetched from either CDN.
    #[error(
        "failed to load module '{module}' from both CDNs ({primary_origin}: {primary_error}; {fallback_origin}: {fallback_error})"
    )]
    ModuleResolution {
        /// The module name as written in `require(...)`.
        module: String,
        /// Origin of the primary CDN.
        primary_origin: String,
        /// Why the primary CDN failed.
        primary_error: String,
        /// Origin of the fallback mirror.
        fallback_origin: String,
        /// Why the fallback mirror failed.
        fallback_error: String,
    },

    /// A binding could not be installed into a fresh realm.
    #[error("failed to initialize realm: {0}")]
    RealmInit(String),

    /// The evaluation task itself failed (panicked or was cancelled).
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl PlaygroundError {
    /// The taxonomy name shown to users in the error line.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaygroundError::Syntax { .. } => "SyntaxError",
            PlaygroundError::Runtime { .. } => "RuntimeError",
            PlaygroundError::IterationLimitExceeded => "IterationLimitExceeded",
            PlaygroundError::CallStackLimitExceeded => "CallStackLimitExceeded",
            PlaygroundError::ArraySizeLimitExceeded { .. } => "ArraySizeLimitExceeded",
            PlaygroundError::Timeout(_) => "ExecutionTimeout",
            PlaygroundError::Aborted => "ExecutionAborted",
            PlaygroundError::ModuleResolution { .. } => "ModuleResolutionFailure",
            PlaygroundError::RealmInit(_) => "RealmInitFailure",
            PlaygroundError::ExecutionFailed(_) => "ExecutionFailure",
        }
    }

    /// Check if this error represents a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PlaygroundError::Timeout(_))
    }

    /// Check if this error was raised by one of the resource guards.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            PlaygroundError::IterationLimitExceeded
                | PlaygroundError::CallStackLimitExceeded
                | PlaygroundError::ArraySizeLimitExceeded { .. }
                | PlaygroundError::Aborted
        )
    }

    /// Check if this error came from user code throwing.
    pub fn is_runtime(&self) -> bool {
        matches!(self, PlaygroundError::Runtime { .. })
    }

    /// Check if this error is a module resolution failure.
    pub fn is_module_resolution(&self) -> bool {
        matches!(self, PlaygroundError::ModuleResolution { .. })
    }
}

/// Result type alias for playground operations.
pub type Result<T> = std::result::Result<T, PlaygroundError>;

/// Parse the rendered form of a thrown JavaScript value.
///
/// Rendered errors look like `TypeError: x is not a function`; anything that
/// does not start with an error-like name is reported as `Uncaught`.
pub fn parse_js_exception(rendered: &str) -> PlaygroundError {
    let rendered = rendered.trim();

    let (exception_type, message) = match rendered.split_once(':') {
        Some((name, rest)) if looks_like_error_name(name) => {
            (name.trim().to_string(), rest.trim().to_string())
        }
        _ if looks_like_error_name(rendered) => (rendered.to_string(), String::new()),
        _ => ("Uncaught".to_string(), rendered.to_string()),
    };

    if exception_type == "RuntimeLimit" {
        // Engine backstops: "Maximum loop iteration limit ..." / "Maximum recursion limit ..."
        let lowered = message.to_ascii_lowercase();
        if lowered.contains("loop") {
            return PlaygroundError::IterationLimitExceeded;
        }
        return PlaygroundError::CallStackLimitExceeded;
    }

    if exception_type == "SyntaxError" {
        return PlaygroundError::Syntax {
            message: rendered.to_string(),
        };
    }

    let headline = message.lines().next().unwrap_or_default().trim();
    match headline {
        "Loop iteration limit exceeded" => return PlaygroundError::IterationLimitExceeded,
        "Call stack limit exceeded" => return PlaygroundError::CallStackLimitExceeded,
        "Execution aborted" => return PlaygroundError::Aborted,
        _ => {}
    }

    if let Some(limit) = headline
        .strip_prefix("Array size exceeds maximum limit of ")
        .and_then(|limit| limit.trim().parse::<u64>().ok())
    {
        return PlaygroundError::ArraySizeLimitExceeded { limit };
    }

    PlaygroundError::Runtime {
        exception_type,
        message,
    }
}

/// Check if a prefix looks like a JavaScript error name.
fn looks_like_error_name(name: &str) -> bool {
    let name = name.trim();
    let first_char = name.chars().next();
    if !first_char.map(|c| c.is_ascii_uppercase()).unwrap_or(false) {
        return false;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return false;
    }
    name.ends_with("Error") || name.ends_with("Exception") || name == "RuntimeLimit"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_exception() {
        let error = parse_js_exception("TypeError: x is not a function");

        if let PlaygroundError::Runtime {
            exception_type,
            message,
        } = error
        {
            assert_eq!(exception_type, "TypeError");
            assert_eq!(message, "x is not a function");
        } else {
            panic!("Expected Runtime error");
        }
    }

    #[test]
    fn test_parse_thrown_string() {
        let error = parse_js_exception("boom: went the dynamite");
        assert!(matches!(
            error,
            PlaygroundError::Runtime { ref exception_type, ref message }
                if exception_type == "Uncaught" && message == "boom: went the dynamite"
        ));
    }

    #[test]
    fn test_parse_bare_error_name() {
        let error = parse_js_exception("RangeError");
        assert!(matches!(
            error,
            PlaygroundError::Runtime { ref exception_type, ref message }
                if exception_type == "RangeError" && message.is_empty()
        ));
    }

    #[test]
    fn test_parse_guard_messages() {
        assert!(matches!(
            parse_js_exception("Error: Loop iteration limit exceeded"),
            PlaygroundError::IterationLimitExceeded
        ));
        assert!(matches!(
            parse_js_exception("Error: Call stack limit exceeded"),
            PlaygroundError::CallStackLimitExceeded
        ));
        assert!(matches!(
            parse_js_exception("Error: Execution aborted"),
            PlaygroundError::Aborted
        ));
        assert!(matches!(
            parse_js_exception("Error: Array size exceeds maximum limit of 1000000"),
            PlaygroundError::ArraySizeLimitExceeded { limit: 1_000_000 }
        ));
    }

    #[test]
    fn test_parse_guard_message_with_trace() {
        assert!(matches!(
            parse_js_exception("Error: Loop iteration limit exceeded\n    at <main> (unknown at :25:21)"),
            PlaygroundError::IterationLimitExceeded
        ));
    }

    #[test]
    fn test_parse_engine_limits() {
        assert!(matches!(
            parse_js_exception("RuntimeLimit: Maximum loop iteration limit 400000 exceeded"),
            PlaygroundError::IterationLimitExceeded
        ));
        assert!(matches!(
            parse_js_exception("RuntimeLimit: Maximum recursion limit 512 exceeded"),
            PlaygroundError::CallStackLimitExceeded
        ));
    }

    #[test]
    fn test_parse_syntax_error() {
        let error = parse_js_exception("SyntaxError: expected token ')'");
        assert!(matches!(error, PlaygroundError::Syntax { .. }));
        assert!(error.to_string().contains("expected token"));
    }

    #[test]
    fn test_error_helpers() {
        let timeout = PlaygroundError::Timeout(std::time::Duration::from_secs(3));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_limit());
        assert_eq!(timeout.kind(), "ExecutionTimeout");

        let limit = PlaygroundError::IterationLimitExceeded;
        assert!(limit.is_limit());
        assert_eq!(limit.to_string(), "Loop iteration limit exceeded");

        let runtime = PlaygroundError::Runtime {
            exception_type: "Error".to_string(),
            message: "boom".to_string(),
        };
        assert!(runtime.is_runtime());
        assert_eq!(runtime.to_string(), "Error: boom");
    }

    #[test]
    fn test_module_resolution_names_both_origins() {
        let error = PlaygroundError::ModuleResolution {
            module: "left-pad".to_string(),
            primary_origin: "https://unpkg.com".to_string(),
            primary_error: "connection refused".to_string(),
            fallback_origin: "https://cdn.jsdelivr.net".to_string(),
            fallback_error: "404 Not Found".to_string(),
        };
        let text = error.to_string();
        assert!(error.is_module_resolution());
        assert_eq!(error.kind(), "ModuleResolutionFailure");
        assert!(text.contains("https://unpkg.com"));
        assert!(text.contains("https://cdn.jsdelivr.net"));
        assert!(text.contains("left-pad"));
    }
}
