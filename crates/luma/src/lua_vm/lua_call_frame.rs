use crate::lua_value::{LuaClosure, LuaValue};
use std::rc::Rc;

/// One in-progress Lua function call on a thread's stack.
///
/// Registers R0..Rn of the frame are `stack[base .. base + max_stack_size]`.
/// For vararg functions the variadic region sits immediately below `base`:
/// `stack[base - vararg_count .. base]`.
pub struct CallFrame {
    /// The function value being run (for introspection and tracebacks).
    pub func: LuaValue,
    pub closure: Rc<LuaClosure>,
    /// Absolute stack index of register 0.
    pub base: usize,
    /// Absolute stack index where results must be written on return
    /// (the callee slot of the originating CALL).
    pub return_base: usize,
    pub pc: usize,
    /// Results expected by the caller; -1 means "all".
    pub nresults: i32,
    pub vararg_count: usize,
    /// Frame was reused by a tail call.
    pub is_tail: bool,
}

impl CallFrame {
    pub fn new(
        func: LuaValue,
        closure: Rc<LuaClosure>,
        base: usize,
        return_base: usize,
        nresults: i32,
        vararg_count: usize,
    ) -> Self {
        CallFrame {
            func,
            closure,
            base,
            return_base,
            pc: 0,
            nresults,
            vararg_count,
            is_tail: false,
        }
    }

    #[inline(always)]
    pub fn vararg_start(&self) -> usize {
        self.base - self.vararg_count
    }

    /// Current source line, from the saved pc.
    pub fn current_line(&self) -> u32 {
        let pc = self.pc.saturating_sub(1);
        self.closure.proto.line_at(pc)
    }
}

impl std::fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallFrame")
            .field("base", &self.base)
            .field("return_base", &self.return_base)
            .field("pc", &self.pc)
            .field("nresults", &self.nresults)
            .field("vararg_count", &self.vararg_count)
            .field("is_tail", &self.is_tail)
            .finish()
    }
}
