//! Call-stack frames
//!
//! A frame records everything the return protocol needs: the caller's
//! resume point, the callee procedure (whose locals get restored from the
//! program stack), the result destination, the self bookkeeping, and the
//! post-return fixup discriminant for calls the dispatcher funnelled
//! through the method path.

use crate::instruction::SpecRef;
use crate::ops::IterMode;
use sett_core::{ClassRef, CodeRef, Mailbox, Pid, ProcRec};
use std::cell::RefCell;
use std::rc::Rc;

/// Post-return fixups for calls that stand in for non-call operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraCode {
    None,
    /// The call was an overloaded comparison: require a boolean atom,
    /// store it (negated for `/=` and `notin`).
    CmpResult { negate: bool },
    /// The returned atom decides a branch: true jumps to `target`.
    CmpBranch { target: u32 },
    /// The returned aggregate seeds an iterator in the given mode.
    StartIter { mode: IterMode },
}

#[derive(Debug, Clone)]
pub struct Frame {
    /// Resume point in the caller.
    pub return_pc: CodeRef,
    /// Procedure executing in this frame.
    pub proc: Rc<ProcRec>,
    /// Where the return value lands.
    pub result: Option<SpecRef>,
    /// Arguments consumed by this call (popped on return).
    pub arg_count: u32,
    /// Caller's executing class.
    pub prev_class: Option<ClassRef>,
    /// The call loaded a new instance; return pops the class self stack.
    pub pushed_self: Option<ClassRef>,
    /// Return exits the interpreter loop instead of resuming bytecode.
    pub c_return: bool,
    /// Literal call: skip the closure environment walk on return.
    pub literal: bool,
    pub extra: ExtraCode,
    /// Frame entered by dispatching a process request; return delivers
    /// into the reply mailbox and idles the process.
    pub process_request: Option<(Pid, Option<Rc<RefCell<Mailbox>>>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sett_core::ProcRec;

    #[test]
    fn test_frame_defaults_shape() {
        let p = Rc::new(ProcRec::code("f", CodeRef { unit: 0, ip: 0 }, 0, 0, 0, 0));
        let f = Frame {
            return_pc: CodeRef { unit: 0, ip: 7 },
            proc: p,
            result: None,
            arg_count: 0,
            prev_class: None,
            pushed_self: None,
            c_return: false,
            literal: true,
            extra: ExtraCode::None,
            process_request: None,
        };
        assert_eq!(f.return_pc.ip, 7);
        assert_eq!(f.extra, ExtraCode::None);
    }
}
