// EQ/LT/LE semantics. Comparison never coerces; __eq fires only for
// same-type tables/userdata that are not rawequal.

use crate::lua_value::LuaValue;
use crate::lua_vm::execute::metamethod::{self, MetaEvent};
use crate::lua_vm::{LuaResult, LuaVM};

pub fn equals(vm: &mut LuaVM, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    if a.raw_equals(b) {
        return Ok(true);
    }
    match (a, b) {
        (LuaValue::Table(_), LuaValue::Table(_))
        | (LuaValue::UserData(_), LuaValue::UserData(_)) => {
            let handler = metamethod::get_metamethod(vm, a, MetaEvent::Eq)
                .or_else(|| metamethod::get_metamethod(vm, b, MetaEvent::Eq));
            match handler {
                Some(h) => {
                    let r = metamethod::call_metamethod(vm, h, vec![a.clone(), b.clone()])?;
                    Ok(r.is_truthy())
                }
                None => Ok(false),
            }
        }
        _ => Ok(false),
    }
}

pub fn less_than(vm: &mut LuaVM, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_ref() < y.as_ref()),
        _ => {
            let handler = metamethod::get_metamethod(vm, a, MetaEvent::Lt)
                .or_else(|| metamethod::get_metamethod(vm, b, MetaEvent::Lt));
            match handler {
                Some(h) => {
                    let r = metamethod::call_metamethod(vm, h, vec![a.clone(), b.clone()])?;
                    Ok(r.is_truthy())
                }
                None => Err(compare_error(vm, a, b)),
            }
        }
    }
}

pub fn less_equal(vm: &mut LuaVM, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_ref() <= y.as_ref()),
        _ => {
            let handler = metamethod::get_metamethod(vm, a, MetaEvent::Le)
                .or_else(|| metamethod::get_metamethod(vm, b, MetaEvent::Le));
            if let Some(h) = handler {
                let r = metamethod::call_metamethod(vm, h, vec![a.clone(), b.clone()])?;
                return Ok(r.is_truthy());
            }
            // a <= b as not (b < a) when only __lt exists
            let lt = metamethod::get_metamethod(vm, a, MetaEvent::Lt)
                .or_else(|| metamethod::get_metamethod(vm, b, MetaEvent::Lt));
            match lt {
                Some(h) => {
                    let r = metamethod::call_metamethod(vm, h, vec![b.clone(), a.clone()])?;
                    Ok(!r.is_truthy())
                }
                None => Err(compare_error(vm, a, b)),
            }
        }
    }
}

fn compare_error(vm: &LuaVM, a: &LuaValue, b: &LuaValue) -> crate::lua_vm::LuaError {
    if a.type_name() == b.type_name() {
        vm.rt_error(format!("attempt to compare two {} values", a.type_name()))
    } else {
        vm.rt_error(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))
    }
}
