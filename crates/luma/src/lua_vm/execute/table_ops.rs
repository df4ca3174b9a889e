// Table access with metamethod fallback: __index / __newindex chains
// (guarded against loops), and the length operation with __len.

use crate::lua_value::LuaValue;
use crate::lua_vm::execute::metamethod::{self, MetaEvent};
use crate::lua_vm::{LuaResult, LuaVM};

/// Nesting bound for __index / __newindex chains.
const MAX_META_CHAIN: usize = 100;

/// `obj[key]` with metamethod fallback.
pub fn index_value(vm: &mut LuaVM, obj: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
    let mut target = obj;
    for _ in 0..MAX_META_CHAIN {
        match &target {
            LuaValue::Table(t) => {
                let raw = t.borrow().raw_get(&key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                match metamethod::get_metamethod(vm, &target, MetaEvent::Index) {
                    None => return Ok(LuaValue::Nil),
                    Some(handler) if handler.is_function() => {
                        return metamethod::call_metamethod(vm, handler, vec![target, key]);
                    }
                    Some(next) => target = next,
                }
            }
            other => match metamethod::get_metamethod(vm, other, MetaEvent::Index) {
                None => {
                    return Err(
                        vm.rt_error(format!("attempt to index a {} value", other.type_name()))
                    );
                }
                Some(handler) if handler.is_function() => {
                    return metamethod::call_metamethod(vm, handler, vec![target, key]);
                }
                Some(next) => target = next,
            },
        }
    }
    Err(vm.rt_error("'__index' chain too long; possible loop".to_string()))
}

/// `obj[key] = value` with metamethod fallback.
pub fn newindex_value(
    vm: &mut LuaVM,
    obj: LuaValue,
    key: LuaValue,
    value: LuaValue,
) -> LuaResult<()> {
    let mut target = obj;
    for _ in 0..MAX_META_CHAIN {
        match &target {
            LuaValue::Table(t) => {
                let present = !t.borrow().raw_get(&key).is_nil();
                if present {
                    let t = t.clone();
                    return t
                        .borrow_mut()
                        .raw_set(key, value)
                        .map_err(|msg| vm.rt_error(msg.to_string()));
                }
                match metamethod::get_metamethod(vm, &target, MetaEvent::NewIndex) {
                    None => {
                        let t = t.clone();
                        return t
                            .borrow_mut()
                            .raw_set(key, value)
                            .map_err(|msg| vm.rt_error(msg.to_string()));
                    }
                    Some(handler) if handler.is_function() => {
                        crate::lua_vm::execute::call::call_function(
                            vm,
                            handler,
                            vec![target, key, value],
                        )?;
                        return Ok(());
                    }
                    Some(next) => target = next,
                }
            }
            other => match metamethod::get_metamethod(vm, other, MetaEvent::NewIndex) {
                None => {
                    return Err(
                        vm.rt_error(format!("attempt to index a {} value", other.type_name()))
                    );
                }
                Some(handler) if handler.is_function() => {
                    crate::lua_vm::execute::call::call_function(
                        vm,
                        handler,
                        vec![target, key, value],
                    )?;
                    return Ok(());
                }
                Some(next) => target = next,
            },
        }
    }
    Err(vm.rt_error("'__newindex' chain too long; possible loop".to_string()))
}

/// `#v`: string byte length, table border (or __len), __len otherwise.
pub fn len_value(vm: &mut LuaVM, value: LuaValue) -> LuaResult<LuaValue> {
    match &value {
        LuaValue::String(s) => Ok(LuaValue::Number(s.len() as f64)),
        LuaValue::Table(t) => {
            if let Some(handler) = metamethod::get_metamethod(vm, &value, MetaEvent::Len) {
                return metamethod::call_metamethod(vm, handler, vec![value]);
            }
            let len = t.borrow().len();
            Ok(LuaValue::Number(len as f64))
        }
        other => match metamethod::get_metamethod(vm, other, MetaEvent::Len) {
            Some(handler) => metamethod::call_metamethod(vm, handler, vec![value]),
            None => Err(vm.rt_error(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))),
        },
    }
}
