use std::{
    fmt,
    time::{Duration, Instant},
};

/// Default cap on nested procedure activations.
///
/// Each activation validates one nested value or one split branch, so this also
/// bounds how deep a document can nest before validation gives up.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// How many instructions run between two wall-clock checks.
const TIME_CHECK_INTERVAL: usize = 1024;

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum instruction count exceeded.
    Instructions { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Too many tokens held for split or unique-item replay.
    Buffer { limit: usize, buffered: usize },
    /// Maximum activation depth exceeded.
    CallDepth { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instructions { limit, count } => {
                write!(f, "instruction limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Buffer { limit, buffered } => {
                write!(f, "token buffer limit exceeded: {buffered} > {limit}")
            }
            Self::CallDepth { .. } => {
                write!(f, "maximum call depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Trait for enforcing execution limits in the VM.
///
/// The VM is generic over its tracker, so [`NoLimitTracker`] compiles every
/// check down to a constant `Ok(())` except the call depth guard.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each instruction.
    fn on_instruction(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new activation.
    ///
    /// # Arguments
    /// * `current_depth` - Activation stack depth before the push
    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Called after a token is appended to the replay buffer.
    ///
    /// # Arguments
    /// * `buffered` - Number of tokens now held
    fn check_buffer(&self, buffered: usize) -> Result<(), ResourceError>;

    /// Number of instructions executed so far, if this tracker counts them.
    fn instruction_count(&self) -> Option<usize> {
        None
    }
}

/// Tracker with no limits other than [`DEFAULT_MAX_CALL_DEPTH`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_CALL_DEPTH {
            Err(ResourceError::CallDepth {
                limit: DEFAULT_MAX_CALL_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn check_buffer(&self, _buffered: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Configuration for [`LimitedTracker`].
///
/// All limits are optional; `None` means unlimited except for the call depth,
/// which falls back to [`DEFAULT_MAX_CALL_DEPTH`].
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_instructions: Option<usize>,
    pub max_duration: Option<Duration>,
    pub max_buffered_tokens: Option<usize>,
    pub max_call_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates limits with only the default call depth set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_call_depth: Some(DEFAULT_MAX_CALL_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_instructions(mut self, limit: usize) -> Self {
        self.max_instructions = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_buffered_tokens(mut self, limit: usize) -> Self {
        self.max_buffered_tokens = Some(limit);
        self
    }

    /// Sets the activation depth limit; `None` restores the default.
    #[must_use]
    pub fn max_call_depth(mut self, limit: Option<usize>) -> Self {
        self.max_call_depth = limit;
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// The clock starts when the tracker is created, so build one per document.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    instruction_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            instruction_count: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_instruction(&mut self) -> Result<(), ResourceError> {
        self.instruction_count += 1;
        if let Some(max) = self.limits.max_instructions
            && self.instruction_count > max
        {
            return Err(ResourceError::Instructions {
                limit: max,
                count: self.instruction_count,
            });
        }
        if let Some(max) = self.limits.max_duration
            && self.instruction_count % TIME_CHECK_INTERVAL == 0
        {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_call_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let limit = self.limits.max_call_depth.unwrap_or(DEFAULT_MAX_CALL_DEPTH);
        if current_depth >= limit {
            Err(ResourceError::CallDepth {
                limit,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    fn check_buffer(&self, buffered: usize) -> Result<(), ResourceError> {
        match self.limits.max_buffered_tokens {
            Some(limit) if buffered > limit => Err(ResourceError::Buffer { limit, buffered }),
            _ => Ok(()),
        }
    }

    fn instruction_count(&self) -> Option<usize> {
        Some(self.instruction_count)
    }
}
