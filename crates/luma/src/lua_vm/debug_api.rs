// Runtime-side debugger interface.
//
// A debugger installs breakpoints by swapping instructions in a
// prototype's code array for the reserved DEBUG_BREAK opcode. When the
// interpreter dispatches the trap it asks the debugger for the original
// instruction and re-executes it at the same pc, leaving the trap in
// place. All code mutation happens inside these callbacks, on the VM
// thread; external control threads talk to the debugger through its own
// command queue.

use crate::lua_value::{LuaClosure, LuaThread, Prototype};
use crate::lua_vm::CallFrame;
use std::rc::Rc;

pub trait LuaDebugger {
    /// Called once for every prototype that becomes reachable
    /// (the whole tree of a freshly compiled chunk).
    fn register_prototype(&self, _proto: &Rc<Prototype>) {}

    /// A Lua frame was pushed onto `thread` (the new frame is the top).
    fn on_frame_push(&self, _thread: &LuaThread) {}

    /// A Lua frame was popped from `thread`.
    fn on_frame_pop(&self, _thread: &LuaThread, _popped: &CallFrame) {}

    /// The interpreter hit a DEBUG_BREAK at `pc` in `closure`'s
    /// prototype. Returns the original instruction for this one
    /// re-execution; the trap stays installed.
    fn handle_debug_break(&self, thread: &LuaThread, pc: usize, closure: &Rc<LuaClosure>) -> u32;
}
