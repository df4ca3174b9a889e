// Luma: an embeddable Lua 5.x runtime
// Compiler front-end, register-based VM, coroutines, metatables,
// debugger trap interface.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod lib_registry;
pub mod lua_pattern;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use lib_registry::{LibraryModule, LibraryRegistry};
pub use lua_value::{
    CoroutineStatus, HostFn, HostFunction, LuaClosure, LuaFunction, LuaTable, LuaThread,
    LuaUserdata, LuaValue, Prototype,
};
pub use lua_vm::{
    CallFrame, CancelToken, ErrorKind, Instruction, LuaContext, LuaDebugger, LuaError, LuaResult,
    LuaVM, OpCode, RunOutcome,
};

/// One-shot convenience: fresh state, full stdlib, run the source.
pub fn execute(source: &str) -> LuaResult<Vec<LuaValue>> {
    let mut vm = LuaVM::new();
    vm.open_libs()?;
    vm.execute(source)
}
