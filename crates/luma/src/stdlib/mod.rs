// Bundled standard libraries, registered through the library registry.

pub mod basic;
pub mod coroutine;
pub mod io;
pub mod math;
pub mod os;
pub mod string;
pub mod table;

use crate::lua_value::LuaValue;
use crate::lua_vm::execute::{call_metamethod, get_metamethod, MetaEvent};
use crate::lua_vm::{LuaResult, LuaVM};

/// tostring with __tostring dispatch; falls back to the default
/// conversion.
pub(crate) fn tostring_value(vm: &mut LuaVM, value: &LuaValue) -> LuaResult<String> {
    if let Some(handler) = get_metamethod(vm, value, MetaEvent::ToString) {
        let result = call_metamethod(vm, handler, vec![value.clone()])?;
        return Ok(match result.as_str() {
            Some(s) => s.to_string(),
            None => result.display(),
        });
    }
    Ok(value.display())
}
