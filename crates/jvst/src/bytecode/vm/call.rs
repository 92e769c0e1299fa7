//! Procedure calls, returns and splits.
//!
//! A split runs its branches one at a time as ordinary activations pushed on
//! top of the caller. The [`SplitState`] remembers the activation depth the
//! split started at; a return that lands back on that depth ends a branch
//! instead of resuming the caller.

use smallvec::smallvec;

use super::{Activation, SplitState, Verdict, Vm};
use crate::{
    error::VmError,
    invalid::InvalidCode,
    op::{Arg, Op, Opcode},
    resource::ResourceTracker,
    tracer::VmTracer,
};

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Pushes a fresh activation of `proc` with zeroed slots.
    pub(super) fn push_activation(&mut self, proc: u32, pc: usize) -> Result<(), VmError> {
        self.tracker.check_call_depth(self.frames.len())?;
        let entry = self
            .exe
            .program
            .procs
            .get(proc as usize)
            .ok_or_else(|| VmError::malformed(pc, format!("call to missing proc {proc}")))?;
        self.frames.push(Activation {
            proc,
            pc: entry.entry as usize,
            slots: smallvec![0; entry.nslots as usize],
            uniqs: Default::default(),
        });
        self.tracer.on_call(proc as usize, self.frames.len());
        Ok(())
    }

    /// Pops the current activation with return value `code`.
    ///
    /// A non-zero code keeps unwinding through plain callers until it reaches a
    /// split boundary or empties the stack. Returns the verdict once the entry
    /// procedure has returned.
    pub(super) fn ret(&mut self, pc: usize, code: i64) -> Result<Option<Verdict>, VmError> {
        loop {
            self.frames.pop();
            let depth = self.frames.len();
            self.tracer.on_return(code, depth);

            if self.splits.last().is_some_and(|s| s.depth == depth) {
                self.finish_branch(pc, code)?;
                return Ok(None);
            }
            if depth == 0 {
                return verdict(pc, code).map(Some);
            }
            if code == 0 {
                return Ok(None);
            }
            // the caller fails with the same code
        }
    }

    /// Starts `SPLIT list, slot` or `SPLITV list, slot`.
    pub(super) fn start_split(&mut self, pc: usize, op: Op) -> Result<(), VmError> {
        let (Arg::Split(split), Arg::Slot(dst)) = (op.a, op.b) else {
            return Err(VmError::malformed(pc, "split needs a list and a slot operand"));
        };
        self.slot(pc, dst)?;
        let mask = op.code == Opcode::SplitV;
        let branches = self.exe.program.splits[split as usize].len();
        if mask && branches > 64 {
            return Err(VmError::malformed(pc, format!("SPLITV over {branches} procedures")));
        }
        self.frame_mut()?.pc += 1;
        self.tracer.on_split_start(split as usize, branches);
        if branches == 0 {
            self.tracer.on_split_end(split as usize, 0);
            *self.slot_mut(pc, Arg::Slot(dst))? = 0;
            return Ok(());
        }
        self.splits.push(SplitState {
            split,
            branch: 0,
            mask,
            dst,
            depth: self.frames.len(),
            cursor: self.cursor,
            saved: self.current.clone(),
            saved_m: self.m,
            result: 0,
        });
        let first = self.exe.program.splits[split as usize][0];
        self.push_activation(first, pc)
    }

    /// Records the result of the branch that just returned and starts the next
    /// one, or completes the split.
    fn finish_branch(&mut self, pc: usize, code: i64) -> Result<(), VmError> {
        let exe = self.exe;
        let state = self
            .splits
            .last_mut()
            .ok_or_else(|| VmError::malformed(pc, "no split in progress"))?;
        if code == 0 {
            if state.mask {
                state.result |= 1i64 << state.branch;
            } else {
                state.result += 1;
            }
        }
        self.cursor = state.cursor;
        self.current = state.saved.clone();
        self.m = state.saved_m;
        self.consume_depth = 0;
        state.branch += 1;

        let list = &exe.program.splits[state.split as usize];
        if let Some(&next) = list.get(state.branch) {
            return self.push_activation(next, pc);
        }
        let (split, dst, result) = (state.split, state.dst, state.result);
        self.splits.pop();
        self.tracer.on_split_end(split as usize, result);
        *self.slot_mut(pc, Arg::Slot(dst))? = result;
        Ok(())
    }
}

fn verdict(pc: usize, code: i64) -> Result<Verdict, VmError> {
    if code == 0 {
        return Ok(Verdict::Valid);
    }
    InvalidCode::from_return(code)
        .map(Verdict::Invalid)
        .ok_or_else(|| VmError::malformed(pc, format!("unknown return code {code}")))
}
