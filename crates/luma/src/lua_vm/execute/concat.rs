// CONCAT: right-associative fold with number->string coercion and
// __concat fallback.

use crate::lua_value::{LuaValue, number_to_string};
use crate::lua_vm::execute::metamethod::{self, MetaEvent};
use crate::lua_vm::{LuaResult, LuaVM};

fn as_concat_piece(v: &LuaValue) -> Option<String> {
    match v {
        LuaValue::String(s) => Some(s.to_string()),
        LuaValue::Number(n) => Some(number_to_string(*n)),
        _ => None,
    }
}

fn concat_pair(vm: &mut LuaVM, left: LuaValue, right: LuaValue) -> LuaResult<LuaValue> {
    if let (Some(mut l), Some(r)) = (as_concat_piece(&left), as_concat_piece(&right)) {
        l.push_str(&r);
        return Ok(vm.new_string_owned(l));
    }
    let handler = metamethod::get_metamethod(vm, &left, MetaEvent::Concat)
        .or_else(|| metamethod::get_metamethod(vm, &right, MetaEvent::Concat))
        .ok_or_else(|| {
            let bad = if as_concat_piece(&left).is_none() {
                &left
            } else {
                &right
            };
            vm.rt_error(format!(
                "attempt to concatenate a {} value",
                bad.type_name()
            ))
        })?;
    metamethod::call_metamethod(vm, handler, vec![left, right])
}

/// Fold R[B]..R[C] from the right.
pub fn concat_values(vm: &mut LuaVM, mut values: Vec<LuaValue>) -> LuaResult<LuaValue> {
    let mut acc = values.pop().unwrap_or(LuaValue::Nil);
    while let Some(left) = values.pop() {
        acc = concat_pair(vm, left, acc)?;
    }
    Ok(acc)
}
