//! Resource limiting for sandboxed runs.
//!
//! Limits are computed from the host's parallelism and enforced by three
//! guards that the realm exposes to user code as host functions:
//! `loopGuard()` (injected into every loop body), `depthCheck(fn)` and
//! `arrayGuard(size)` (called by the guarded `Array` wrapper).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use boa_engine::{JsArgs, JsError, JsNativeError, JsValue};
use thiserror::Error;

use crate::error::PlaygroundError;
use crate::playground::realm::{Binding, ExecutionContext, HostFunction};

/// Hosts with more parallel units than this get the capable tier.
const CAPABLE_PARALLELISM: usize = 4;

/// Parallelism assumed when the host cannot report it.
const FALLBACK_PARALLELISM: usize = 2;

/// Limits applied to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Wall-clock budget of the evaluation.
    pub timeout: Duration,
    /// Total loop-guard ticks allowed across all loops.
    pub max_iterations: u64,
    /// Maximum nesting of `depthCheck` calls.
    pub max_depth: usize,
    /// Largest explicit size accepted by `new Array(n)`.
    pub max_array_size: u64,
}

impl ExecutionLimits {
    /// Limits for a host with the given number of parallel hardware units.
    ///
    /// The capable tier gets more time and a deeper stack but fewer loop
    /// iterations, since each iteration is expected to do more work there.
    pub fn for_parallelism(units: usize) -> Self {
        if units > CAPABLE_PARALLELISM {
            Self {
                timeout: Duration::from_millis(5_000),
                max_iterations: 100_000,
                max_depth: 150,
                max_array_size: 2_000_000,
            }
        } else {
            Self {
                timeout: Duration::from_millis(3_000),
                max_iterations: 300_000,
                max_depth: 80,
                max_array_size: 1_000_000,
            }
        }
    }

    /// Limits for the current host.
    pub fn detect() -> Self {
        Self::for_parallelism(Self::host_parallelism())
    }

    /// Number of parallel hardware units reported by the host.
    pub fn host_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|units| units.get())
            .unwrap_or(FALLBACK_PARALLELISM)
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::detect()
    }
}

/// Failures raised by the guards.
///
/// The display strings are what user code sees as the thrown `Error`'s
/// message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("Loop iteration limit exceeded")]
    IterationLimit,
    #[error("Call stack limit exceeded")]
    CallStackLimit,
    #[error("Execution aborted")]
    Aborted,
    #[error("Array size exceeds maximum limit of {limit}")]
    ArraySize { limit: u64 },
}

impl From<LimitError> for PlaygroundError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::IterationLimit => PlaygroundError::IterationLimitExceeded,
            LimitError::CallStackLimit => PlaygroundError::CallStackLimitExceeded,
            LimitError::Aborted => PlaygroundError::Aborted,
            LimitError::ArraySize { limit } => PlaygroundError::ArraySizeLimitExceeded { limit },
        }
    }
}

impl From<LimitError> for JsError {
    fn from(err: LimitError) -> Self {
        JsNativeError::error().with_message(err.to_string()).into()
    }
}

/// Shared counter of loop iterations for one run.
#[derive(Debug)]
pub struct LoopGuard {
    count: AtomicU64,
    max_iterations: u64,
    aborted: Arc<AtomicBool>,
}

impl LoopGuard {
    /// Create a guard allowing `max_iterations` ticks.
    pub fn new(max_iterations: u64) -> Self {
        Self::with_abort(max_iterations, Arc::new(AtomicBool::new(false)))
    }

    /// Create a guard that also fails once `aborted` is raised.
    pub fn with_abort(max_iterations: u64, aborted: Arc<AtomicBool>) -> Self {
        Self {
            count: AtomicU64::new(0),
            max_iterations,
            aborted,
        }
    }

    /// Count one iteration.
    pub fn tick(&self) -> Result<(), LimitError> {
        if self.aborted.load(Ordering::Relaxed) {
            return Err(LimitError::Aborted);
        }
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.max_iterations {
            return Err(LimitError::IterationLimit);
        }
        Ok(())
    }

    /// Iterations counted so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Start counting from zero again.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Call-depth counter with an external abort flag.
#[derive(Debug)]
pub struct DepthGuard {
    depth: AtomicUsize,
    max_depth: usize,
    aborted: Arc<AtomicBool>,
}

impl DepthGuard {
    /// Create a guard allowing `max_depth` nested calls.
    pub fn new(max_depth: usize, aborted: Arc<AtomicBool>) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            max_depth,
            aborted,
        }
    }

    /// Enter one level; the level is left when the returned token drops.
    pub fn enter(&self) -> Result<DepthToken<'_>, LimitError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(LimitError::Aborted);
        }
        if self.depth.load(Ordering::SeqCst) >= self.max_depth {
            return Err(LimitError::CallStackLimit);
        }
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(DepthToken { guard: self })
    }

    /// Current depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// One level of [`DepthGuard`] nesting.
#[derive(Debug)]
pub struct DepthToken<'a> {
    guard: &'a DepthGuard,
}

impl Drop for DepthToken<'_> {
    fn drop(&mut self) {
        self.guard.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Rejects oversized explicit array allocations.
#[derive(Debug, Clone, Copy)]
pub struct ArrayGuard {
    max_array_size: u64,
}

impl ArrayGuard {
    /// Create a guard accepting sizes up to `max_array_size`.
    pub fn new(max_array_size: u64) -> Self {
        Self { max_array_size }
    }

    /// Check a requested size before allocating.
    pub fn check(&self, requested: f64) -> Result<(), LimitError> {
        if requested > self.max_array_size as f64 {
            return Err(LimitError::ArraySize {
                limit: self.max_array_size,
            });
        }
        Ok(())
    }
}

/// Cancels a run cooperatively.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Raise the abort flag; the loop and depth guards fail on their next check.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the flag was raised.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The guards of one run, ready to be installed into a context.
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    limits: ExecutionLimits,
    loop_guard: Arc<LoopGuard>,
    depth_guard: Arc<DepthGuard>,
    array_guard: ArrayGuard,
    aborted: Arc<AtomicBool>,
}

impl ResourceLimiter {
    /// Create fresh guards for the given limits.
    pub fn new(limits: ExecutionLimits) -> Self {
        let aborted = Arc::new(AtomicBool::new(false));
        Self {
            limits,
            loop_guard: Arc::new(LoopGuard::with_abort(limits.max_iterations, Arc::clone(&aborted))),
            depth_guard: Arc::new(DepthGuard::new(limits.max_depth, Arc::clone(&aborted))),
            array_guard: ArrayGuard::new(limits.max_array_size),
            aborted,
        }
    }

    /// The limits these guards enforce.
    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// The loop guard.
    pub fn loop_guard(&self) -> &LoopGuard {
        &self.loop_guard
    }

    /// The depth guard.
    pub fn depth_guard(&self) -> &DepthGuard {
        &self.depth_guard
    }

    /// The array-size guard.
    pub fn array_guard(&self) -> ArrayGuard {
        self.array_guard
    }

    /// Handle that raises this run's abort flag.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.aborted),
        }
    }

    /// Expose `loopGuard`, `depthCheck` and `arrayGuard` to the script.
    pub fn install(&self, context: &mut ExecutionContext) {
        let loop_guard = Arc::clone(&self.loop_guard);
        context.add_property(
            "loopGuard",
            Binding::Function(HostFunction::new(move |_this, _args, _ctx| {
                loop_guard.tick()?;
                Ok(JsValue::undefined())
            })),
        );

        let depth_guard = Arc::clone(&self.depth_guard);
        context.add_property(
            "depthCheck",
            Binding::Function(HostFunction::new(move |_this, args, ctx| {
                let _level = depth_guard.enter()?;
                let callee = args.get_or_undefined(0).as_callable().ok_or_else(|| {
                    JsNativeError::typ().with_message("depthCheck expects a function")
                })?;
                callee.call(&JsValue::undefined(), &[], ctx)
            })),
        );

        let array_guard = self.array_guard;
        context.add_property(
            "arrayGuard",
            Binding::Function(HostFunction::new(move |_this, args, _ctx| {
                if let Some(requested) = args.get_or_undefined(0).as_number() {
                    array_guard.check(requested)?;
                }
                Ok(JsValue::undefined())
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        let capable = ExecutionLimits::for_parallelism(8);
        assert_eq!(capable.timeout, Duration::from_millis(5_000));
        assert_eq!(capable.max_iterations, 100_000);
        assert_eq!(capable.max_depth, 150);
        assert_eq!(capable.max_array_size, 2_000_000);

        let constrained = ExecutionLimits::for_parallelism(4);
        assert_eq!(constrained.timeout, Duration::from_millis(3_000));
        assert_eq!(constrained.max_iterations, 300_000);
        assert_eq!(constrained.max_depth, 80);
        assert_eq!(constrained.max_array_size, 1_000_000);
    }

    #[test]
    fn test_loop_guard_fires_after_limit() {
        let guard = LoopGuard::new(3);
        assert!(guard.tick().is_ok());
        assert!(guard.tick().is_ok());
        assert!(guard.tick().is_ok());
        assert_eq!(guard.tick(), Err(LimitError::IterationLimit));
        assert_eq!(guard.count(), 4);

        guard.reset();
        assert!(guard.tick().is_ok());
    }

    #[test]
    fn test_depth_guard_unwinds() {
        let guard = DepthGuard::new(2, Arc::new(AtomicBool::new(false)));
        {
            let _outer = guard.enter().unwrap();
            let _inner = guard.enter().unwrap();
            assert_eq!(guard.depth(), 2);
            assert_eq!(guard.enter().unwrap_err(), LimitError::CallStackLimit);
        }
        assert_eq!(guard.depth(), 0);
    }

    #[test]
    fn test_depth_guard_observes_abort() {
        let limiter = ResourceLimiter::new(ExecutionLimits::for_parallelism(2));
        let handle = limiter.abort_handle();
        assert!(limiter.depth_guard().enter().is_ok());

        handle.abort();
        assert!(handle.is_aborted());
        assert_eq!(
            limiter.depth_guard().enter().unwrap_err(),
            LimitError::Aborted
        );
    }

    #[test]
    fn test_loop_guard_observes_abort() {
        let limiter = ResourceLimiter::new(ExecutionLimits::for_parallelism(2));
        assert!(limiter.loop_guard().tick().is_ok());
        limiter.abort_handle().abort();
        assert_eq!(limiter.loop_guard().tick(), Err(LimitError::Aborted));
    }

    #[test]
    fn test_array_guard() {
        let guard = ArrayGuard::new(10);
        assert!(guard.check(10.0).is_ok());
        assert_eq!(
            guard.check(11.0).unwrap_err().to_string(),
            "Array size exceeds maximum limit of 10"
        );
    }

    #[test]
    fn test_limit_error_maps_to_playground_error() {
        let err: PlaygroundError = LimitError::ArraySize { limit: 7 }.into();
        assert!(matches!(err, PlaygroundError::ArraySizeLimitExceeded { limit: 7 }));
    }

    #[test]
    fn test_install_registers_guards() {
        let limiter = ResourceLimiter::new(ExecutionLimits::for_parallelism(2));
        let mut context = ExecutionContext::new();
        limiter.install(&mut context);
        for name in ["loopGuard", "depthCheck", "arrayGuard"] {
            assert!(context.contains(name), "missing {name}");
        }
    }
}
