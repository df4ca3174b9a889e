// Table library.

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, number_to_string};
use crate::lua_vm::execute::{call_function, comparison_less_than};
use crate::lua_vm::{LuaContext, LuaError, LuaResult};

pub fn create_table_lib() -> LibraryModule {
    crate::lib_module!("table", {
        "insert" => table_insert,
        "remove" => table_remove,
        "concat" => table_concat,
        "unpack" => table_unpack,
        "pack" => table_pack,
        "sort" => table_sort,
    })
}

fn table_insert(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    match ctx.arg_count() {
        2 => {
            let v = ctx.check_any(2)?;
            let len = t.borrow().len();
            t.borrow_mut().raw_seti(len + 1, v);
        }
        3 => {
            let pos = ctx.check_integer(2)?;
            let v = ctx.check_any(3)?;
            let len = t.borrow().len();
            if pos < 1 || pos > len + 1 {
                return Err(ctx.bad_argument(2, "position out of bounds"));
            }
            // Shift the tail up
            let mut i = len;
            while i >= pos {
                let moved = t.borrow().raw_geti(i);
                t.borrow_mut().raw_seti(i + 1, moved);
                i -= 1;
            }
            t.borrow_mut().raw_seti(pos, v);
        }
        _ => {
            return Err(LuaError::runtime(
                "wrong number of arguments to 'insert'".to_string(),
            ));
        }
    }
    Ok(0)
}

fn table_remove(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let len = t.borrow().len();
    let pos = ctx.opt_integer(2, len)?;
    if len == 0 && ctx.arg(2).is_nil() {
        ctx.push(LuaValue::Nil);
        return Ok(1);
    }
    if len > 0 && (pos < 1 || pos > len + 1) {
        return Err(ctx.bad_argument(2, "position out of bounds"));
    }
    let removed = t.borrow().raw_geti(pos);
    let mut i = pos;
    while i < len {
        let moved = t.borrow().raw_geti(i + 1);
        t.borrow_mut().raw_seti(i, moved);
        i += 1;
    }
    t.borrow_mut().raw_seti(len, LuaValue::Nil);
    ctx.push(removed);
    Ok(1)
}

fn table_concat(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let sep = ctx.opt_string(2, "")?;
    let i = ctx.opt_integer(3, 1)?;
    let j = match ctx.arg(4) {
        LuaValue::Nil => t.borrow().len(),
        _ => ctx.check_integer(4)?,
    };
    let mut pieces = Vec::new();
    for k in i..=j {
        let v = t.borrow().raw_geti(k);
        match &v {
            LuaValue::String(s) => pieces.push(s.to_string()),
            LuaValue::Number(n) => pieces.push(number_to_string(*n)),
            other => {
                return Err(LuaError::runtime(format!(
                    "invalid value (at index {}) in table for 'concat' (got {})",
                    k,
                    other.type_name()
                )));
            }
        }
    }
    let out = pieces.join(&sep);
    let v = ctx.vm().new_string_owned(out);
    ctx.push(v);
    Ok(1)
}

fn table_unpack(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let i = ctx.opt_integer(2, 1)?;
    let j = match ctx.arg(3) {
        LuaValue::Nil => t.borrow().len(),
        _ => ctx.check_integer(3)?,
    };
    let mut count = 0;
    for k in i..=j {
        let v = t.borrow().raw_geti(k);
        ctx.push(v);
        count += 1;
    }
    Ok(count)
}

fn table_pack(ctx: &mut LuaContext) -> LuaResult<usize> {
    let args = ctx.args();
    let n = args.len();
    let packed = ctx.vm().new_table_with(n, 1);
    if let Some(t) = packed.as_table() {
        let mut t = t.borrow_mut();
        for (i, v) in args.into_iter().enumerate() {
            t.raw_seti((i + 1) as i64, v);
        }
    }
    let key = ctx.intern("n");
    if let Some(t) = packed.as_table() {
        let _ = t.borrow_mut().raw_set(key, LuaValue::Number(n as f64));
    }
    ctx.push(packed);
    Ok(1)
}

/// Stable merge sort so comparator calls re-enter the VM safely.
fn merge_sort(
    ctx: &mut LuaContext,
    values: &mut Vec<LuaValue>,
    comparator: &Option<LuaValue>,
) -> LuaResult<()> {
    let len = values.len();
    if len < 2 {
        return Ok(());
    }
    let mid = len / 2;
    let mut right = values.split_off(mid);
    merge_sort(ctx, values, comparator)?;
    merge_sort(ctx, &mut right, comparator)?;

    let mut merged = Vec::with_capacity(len);
    let mut li = 0;
    let mut ri = 0;
    while li < values.len() && ri < right.len() {
        if sort_less(ctx, &right[ri], &values[li], comparator)? {
            merged.push(right[ri].clone());
            ri += 1;
        } else {
            merged.push(values[li].clone());
            li += 1;
        }
    }
    merged.extend_from_slice(&values[li..]);
    merged.extend_from_slice(&right[ri..]);
    *values = merged;
    Ok(())
}

fn sort_less(
    ctx: &mut LuaContext,
    a: &LuaValue,
    b: &LuaValue,
    comparator: &Option<LuaValue>,
) -> LuaResult<bool> {
    match comparator {
        Some(f) => {
            let results = call_function(ctx.vm(), f.clone(), vec![a.clone(), b.clone()])?;
            Ok(results.first().map(|v| v.is_truthy()).unwrap_or(false))
        }
        None => comparison_less_than(ctx.vm(), a, b),
    }
}

fn table_sort(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let comparator = match ctx.arg(2) {
        LuaValue::Nil => None,
        f @ LuaValue::Function(_) => Some(f),
        _ => return Err(ctx.bad_argument(2, "function")),
    };
    let len = t.borrow().len();
    let mut values = Vec::with_capacity(len as usize);
    for i in 1..=len {
        values.push(t.borrow().raw_geti(i));
    }
    merge_sort(ctx, &mut values, &comparator)?;
    for (i, v) in values.into_iter().enumerate() {
        t.borrow_mut().raw_seti((i + 1) as i64, v);
    }
    Ok(0)
}
