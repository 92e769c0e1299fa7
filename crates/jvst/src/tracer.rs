//! VM execution tracing.
//!
//! The VM carries its tracer as a type parameter, so with [`NoopTracer`] every
//! hook is inlined away, the same way [`NoLimitTracker`](crate::NoLimitTracker)
//! removes limit checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost default |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Opcode counts, call depth, split and token totals |
//! | [`CoverageTracer`] | Set of executed instruction indices |
//! | [`RecordingTracer`] | Full event list for post-mortem analysis |
//!
//! ```ignore
//! let mut validator = schema.validator_with(NoLimitTracker, ProfilingTracer::new());
//! validator.validate_more(br#"{"a": 1}"#)?;
//! validator.validate_close()?;
//! println!("{}", validator.tracer().report());
//! ```

use ahash::{AHashMap, AHashSet};

use crate::{op::Opcode, token::TokenKind};

/// Trace event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction { pc: usize, opcode: Opcode, depth: usize },
    /// A procedure activation was pushed.
    Call { proc: usize, depth: usize },
    /// A procedure returned `code`.
    Return { code: i64, depth: usize },
    /// A split started running `branches` procedures.
    SplitStart { split: usize, branches: usize },
    /// A split finished with `result` (pass count or bitmask).
    SplitEnd { split: usize, result: i64 },
    /// A token was read into the token registers.
    Token { kind: TokenKind },
    /// Execution suspended waiting for input.
    Suspend { pc: usize },
}

/// Hooks called by the VM. All default to no-ops.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction; the hottest hook.
    #[inline(always)]
    fn on_instruction(&mut self, _pc: usize, _opcode: Opcode, _depth: usize) {}

    /// Called after a procedure activation is pushed.
    #[inline(always)]
    fn on_call(&mut self, _proc: usize, _depth: usize) {}

    /// Called after a procedure returns; `depth` is the stack depth after the pop.
    #[inline(always)]
    fn on_return(&mut self, _code: i64, _depth: usize) {}

    #[inline(always)]
    fn on_split_start(&mut self, _split: usize, _branches: usize) {}

    #[inline(always)]
    fn on_split_end(&mut self, _split: usize, _result: i64) {}

    #[inline(always)]
    fn on_token(&mut self, _kind: TokenKind) {}

    /// Called when execution stops to wait for more input.
    #[inline(always)]
    fn on_suspend(&mut self, _pc: usize) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints an execution log to stderr.
///
/// ```text
/// [    0] TOKEN  depth=1
///   --- token OBJECT_BEG
/// [    1] IEQ  depth=1
///   >>> CALL proc3  depth=2
///   <<< RETURN 0  depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Stop logging after this many instructions.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, pc: usize, opcode: Opcode, depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{pc:>5}] {}  depth={depth}", opcode.name());
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, proc: usize, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL proc{proc}  depth={depth}");
        }
    }

    fn on_return(&mut self, code: i64, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN {code}  depth={depth}");
        }
    }

    fn on_split_start(&mut self, split: usize, branches: usize) {
        if !self.stopped {
            eprintln!("  +++ SPLIT split{split}  branches={branches}");
        }
    }

    fn on_split_end(&mut self, split: usize, result: i64) {
        if !self.stopped {
            eprintln!("  --- SPLIT split{split}  result={result}");
        }
    }

    fn on_token(&mut self, kind: TokenKind) {
        if !self.stopped {
            eprintln!("  --- token {}", kind.name());
        }
    }

    fn on_suspend(&mut self, pc: usize) {
        if !self.stopped {
            eprintln!("  ... need more input at {pc}");
        }
    }
}

/// Tracer that collects execution statistics.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    opcode_counts: AHashMap<Opcode, u64>,
    total_instructions: u64,
    max_depth: usize,
    total_calls: u64,
    total_splits: u64,
    total_tokens: u64,
    suspensions: u64,
}

/// Summary produced by [`ProfilingTracer::report`].
#[derive(Debug)]
pub struct ProfilingReport {
    /// Per-opcode counts, most frequent first.
    pub opcode_counts: Vec<(Opcode, u64)>,
    pub total_instructions: u64,
    pub max_depth: usize,
    pub total_calls: u64,
    pub total_splits: u64,
    pub total_tokens: u64,
    pub suspensions: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        let mut opcode_counts: Vec<_> = self.opcode_counts.iter().map(|(&k, &v)| (k, v)).collect();
        opcode_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        ProfilingReport {
            opcode_counts,
            total_instructions: self.total_instructions,
            max_depth: self.max_depth,
            total_calls: self.total_calls,
            total_splits: self.total_splits,
            total_tokens: self.total_tokens,
            suspensions: self.suspensions,
        }
    }
}

impl VmTracer for ProfilingTracer {
    #[inline]
    fn on_instruction(&mut self, _pc: usize, opcode: Opcode, _depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    #[inline]
    fn on_call(&mut self, _proc: usize, depth: usize) {
        self.total_calls += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_split_start(&mut self, _split: usize, _branches: usize) {
        self.total_splits += 1;
    }

    fn on_token(&mut self, _kind: TokenKind) {
        self.total_tokens += 1;
    }

    fn on_suspend(&mut self, _pc: usize) {
        self.suspensions += 1;
    }
}

impl std::fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== VM Profiling Report ===")?;
        writeln!(f, "Total instructions: {}", self.total_instructions)?;
        writeln!(f, "Total calls:        {}", self.total_calls)?;
        writeln!(f, "Max call depth:     {}", self.max_depth)?;
        writeln!(f, "Splits:             {}", self.total_splits)?;
        writeln!(f, "Tokens read:        {}", self.total_tokens)?;
        writeln!(f, "Suspensions:        {}", self.suspensions)?;
        writeln!(f)?;
        writeln!(f, "--- Opcode Frequency ---")?;
        for (opcode, count) in &self.opcode_counts {
            let pct = (*count as f64 / self.total_instructions as f64) * 100.0;
            writeln!(f, "  {:<8} {count:>10}  ({pct:>5.1}%)", opcode.name())?;
        }
        Ok(())
    }
}

/// Tracer that records which instructions executed.
#[derive(Debug, Default)]
pub struct CoverageTracer {
    pcs: AHashSet<usize>,
}

impl CoverageTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn covered(&self) -> &AHashSet<usize> {
        &self.pcs
    }

    #[must_use]
    pub fn coverage_count(&self) -> usize {
        self.pcs.len()
    }
}

impl VmTracer for CoverageTracer {
    #[inline]
    fn on_instruction(&mut self, pc: usize, _opcode: Opcode, _depth: usize) {
        self.pcs.insert(pc);
    }
}

/// Tracer that records every event, optionally up to a limit.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|l| self.events.len() < l) {
            self.events.push(event);
        }
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, pc: usize, opcode: Opcode, depth: usize) {
        self.record(TraceEvent::Instruction { pc, opcode, depth });
    }

    fn on_call(&mut self, proc: usize, depth: usize) {
        self.record(TraceEvent::Call { proc, depth });
    }

    fn on_return(&mut self, code: i64, depth: usize) {
        self.record(TraceEvent::Return { code, depth });
    }

    fn on_split_start(&mut self, split: usize, branches: usize) {
        self.record(TraceEvent::SplitStart { split, branches });
    }

    fn on_split_end(&mut self, split: usize, result: i64) {
        self.record(TraceEvent::SplitEnd { split, result });
    }

    fn on_token(&mut self, kind: TokenKind) {
        self.record(TraceEvent::Token { kind });
    }

    fn on_suspend(&mut self, pc: usize) {
        self.record(TraceEvent::Suspend { pc });
    }
}
