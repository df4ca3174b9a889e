// Basic library: the global functions every chunk expects.

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::{get_metamethod, get_metatable, MetaEvent};
use crate::lua_vm::{ErrorKind, LuaContext, LuaError, LuaResult, RuntimeError};
use crate::stdlib::tostring_value;

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "print" => basic_print,
        "type" => basic_type,
        "tostring" => basic_tostring,
        "tonumber" => basic_tonumber,
        "pairs" => basic_pairs,
        "ipairs" => basic_ipairs,
        "next" => basic_next,
        "select" => basic_select,
        "rawget" => basic_rawget,
        "rawset" => basic_rawset,
        "rawequal" => basic_rawequal,
        "rawlen" => basic_rawlen,
        "setmetatable" => basic_setmetatable,
        "getmetatable" => basic_getmetatable,
        "pcall" => basic_pcall,
        "xpcall" => basic_xpcall,
        "error" => basic_error,
        "assert" => basic_assert,
        "load" => basic_load,
        "loadstring" => basic_load,
        "loadfile" => basic_loadfile,
        "dofile" => basic_dofile,
        "unpack" => basic_unpack,
    })
}

fn basic_print(ctx: &mut LuaContext) -> LuaResult<usize> {
    let args = ctx.args();
    let mut pieces = Vec::with_capacity(args.len());
    for v in &args {
        pieces.push(tostring_value(ctx.vm(), v)?);
    }
    println!("{}", pieces.join("\t"));
    Ok(0)
}

fn basic_type(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    let name = ctx.intern(v.type_name());
    ctx.push(name);
    Ok(1)
}

fn basic_tostring(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    let s = tostring_value(ctx.vm(), &v)?;
    let s = ctx.vm().new_string_owned(s);
    ctx.push(s);
    Ok(1)
}

fn basic_tonumber(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.arg(1);
    match ctx.arg(2) {
        LuaValue::Nil => {
            match v.coerce_number() {
                Some(n) => ctx.push(LuaValue::Number(n)),
                None => ctx.push(LuaValue::Nil),
            }
        }
        base => {
            let base = base
                .coerce_number()
                .ok_or_else(|| ctx.bad_argument(2, "number"))? as u32;
            if !(2..=36).contains(&base) {
                return Err(ctx.bad_argument(2, "base out of range"));
            }
            let s = ctx.check_string(1)?;
            match i64::from_str_radix(s.trim(), base) {
                Ok(n) => ctx.push(LuaValue::Number(n as f64)),
                Err(_) => ctx.push(LuaValue::Nil),
            }
        }
    }
    Ok(1)
}

/// Default stateless iterator used by pairs.
fn basic_next(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let key = ctx.arg(2);
    let next = t
        .borrow()
        .next(&key)
        .map_err(|msg| LuaError::runtime(msg.to_string()))?;
    match next {
        Some((k, v)) => {
            ctx.push(k);
            ctx.push(v);
            Ok(2)
        }
        None => {
            ctx.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn basic_pairs(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    if let Some(handler) = get_metamethod(ctx.vm_ref(), &v, MetaEvent::Pairs) {
        let results = crate::lua_vm::execute::call_function(ctx.vm(), handler, vec![v])?;
        for r in results.into_iter().take(3) {
            ctx.push(r);
        }
        return Ok(3);
    }
    let next_fn = ctx.vm().get_global("next");
    ctx.push(next_fn);
    ctx.push(v);
    ctx.push(LuaValue::Nil);
    Ok(3)
}

/// Iterator backing ipairs: (t, i) -> i+1, t[i+1] until nil.
fn ipairs_iterator(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let i = ctx.check_integer(2)? + 1;
    let v = t.borrow().raw_geti(i);
    if v.is_nil() {
        ctx.push(LuaValue::Nil);
        Ok(1)
    } else {
        ctx.push(LuaValue::Number(i as f64));
        ctx.push(v);
        Ok(2)
    }
}

fn basic_ipairs(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    if let Some(handler) = get_metamethod_ipairs(ctx) {
        let results = crate::lua_vm::execute::call_function(ctx.vm(), handler, vec![v])?;
        for r in results.into_iter().take(3) {
            ctx.push(r);
        }
        return Ok(3);
    }
    let iter = LuaValue::host_function(crate::lua_value::HostFunction::new(
        "ipairs_iterator",
        ipairs_iterator,
    ));
    ctx.push(iter);
    ctx.push(v);
    ctx.push(LuaValue::Number(0.0));
    Ok(3)
}

fn get_metamethod_ipairs(ctx: &LuaContext) -> Option<LuaValue> {
    let v = ctx.arg(1);
    let mt = get_metatable(ctx.vm_ref(), &v)?;
    let key = LuaValue::String("__ipairs".into());
    let handler = mt.borrow().raw_get(&key);
    if handler.is_nil() { None } else { Some(handler) }
}

fn basic_select(ctx: &mut LuaContext) -> LuaResult<usize> {
    let n = ctx.arg_count();
    match ctx.arg(1) {
        LuaValue::String(s) if &*s == "#" => {
            ctx.push(LuaValue::Number((n - 1) as f64));
            Ok(1)
        }
        v => {
            let mut idx = v
                .coerce_number()
                .ok_or_else(|| ctx.bad_argument(1, "number"))? as i64;
            let rest = (n - 1) as i64;
            if idx < 0 {
                idx += rest + 1;
            }
            if idx < 1 {
                return Err(ctx.bad_argument(1, "index out of range"));
            }
            let mut count = 0;
            for i in (idx + 1)..=(rest + 1) {
                ctx.push(ctx.arg(i as usize));
                count += 1;
            }
            Ok(count)
        }
    }
}

fn basic_rawget(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let k = ctx.check_any(2)?;
    let v = t.borrow().raw_get(&k);
    ctx.push(v);
    Ok(1)
}

fn basic_rawset(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let k = ctx.check_any(2)?;
    let v = ctx.check_any(3)?;
    t.borrow_mut()
        .raw_set(k, v)
        .map_err(|msg| LuaError::runtime(msg.to_string()))?;
    ctx.push(ctx.arg(1));
    Ok(1)
}

fn basic_rawequal(ctx: &mut LuaContext) -> LuaResult<usize> {
    let a = ctx.check_any(1)?;
    let b = ctx.check_any(2)?;
    ctx.push(LuaValue::Boolean(a.raw_equals(&b)));
    Ok(1)
}

fn basic_rawlen(ctx: &mut LuaContext) -> LuaResult<usize> {
    match ctx.arg(1) {
        LuaValue::Table(t) => {
            let len = t.borrow().len();
            ctx.push(LuaValue::Number(len as f64));
            Ok(1)
        }
        LuaValue::String(s) => {
            ctx.push(LuaValue::Number(s.len() as f64));
            Ok(1)
        }
        _ => Err(ctx.bad_argument(1, "table or string")),
    }
}

fn basic_setmetatable(ctx: &mut LuaContext) -> LuaResult<usize> {
    let t = ctx.check_table(1)?;
    let mt = match ctx.arg(2) {
        LuaValue::Nil => None,
        LuaValue::Table(m) => Some(m),
        _ => return Err(ctx.bad_argument(2, "nil or table")),
    };
    // A protected metatable cannot be replaced
    if let Some(existing) = t.borrow().metatable() {
        let key = LuaValue::String("__metatable".into());
        if !existing.borrow().raw_get(&key).is_nil() {
            return Err(LuaError::runtime(
                "cannot change a protected metatable".to_string(),
            ));
        }
    }
    t.borrow_mut().set_metatable(mt);
    ctx.push(ctx.arg(1));
    Ok(1)
}

fn basic_getmetatable(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    match get_metatable(ctx.vm_ref(), &v) {
        Some(mt) => {
            let key = LuaValue::String("__metatable".into());
            let protected = mt.borrow().raw_get(&key);
            if !protected.is_nil() {
                ctx.push(protected);
            } else {
                ctx.push(LuaValue::Table(mt));
            }
        }
        None => ctx.push(LuaValue::Nil),
    }
    Ok(1)
}

fn basic_pcall(ctx: &mut LuaContext) -> LuaResult<usize> {
    let f = ctx.check_any(1)?;
    let args = ctx.args()[1..].to_vec();
    let (ok, results) = ctx.vm().pcall(f, args)?;
    ctx.push(LuaValue::Boolean(ok));
    let n = results.len();
    ctx.push_all(results);
    Ok(1 + n)
}

fn basic_xpcall(ctx: &mut LuaContext) -> LuaResult<usize> {
    let f = ctx.check_any(1)?;
    let handler = ctx.check_function(2)?;
    let args = ctx.args()[2..].to_vec();
    let (ok, results) = ctx.vm().xpcall(f, args, handler)?;
    ctx.push(LuaValue::Boolean(ok));
    let n = results.len();
    ctx.push_all(results);
    Ok(1 + n)
}

fn basic_error(ctx: &mut LuaContext) -> LuaResult<usize> {
    let value = ctx.arg(1);
    let level = ctx.opt_integer(2, 1)?;
    // String errors at level >= 1 gain a position prefix
    let value = match (&value, level) {
        (LuaValue::String(s), l) if l >= 1 => {
            let prefixed = format!("{}{}", ctx.vm_ref().where_(), s);
            ctx.vm().new_string_owned(prefixed)
        }
        _ => value,
    };
    Err(ctx.vm().rt_error_value(value))
}

fn basic_assert(ctx: &mut LuaContext) -> LuaResult<usize> {
    let v = ctx.check_any(1)?;
    if v.is_truthy() {
        let args = ctx.args();
        let n = args.len();
        ctx.push_all(args);
        return Ok(n);
    }
    let message = match ctx.arg(2) {
        LuaValue::Nil => {
            let m = format!("{}assertion failed!", ctx.vm_ref().where_());
            ctx.vm().new_string_owned(m)
        }
        m => m,
    };
    Err(LuaError::Runtime(Box::new(RuntimeError {
        value: message,
        kind: ErrorKind::Assertion,
        traceback: Some(ctx.vm_ref().build_traceback()),
    })))
}

fn basic_load(ctx: &mut LuaContext) -> LuaResult<usize> {
    let source = match ctx.arg(1) {
        LuaValue::String(s) => s.to_string(),
        f @ LuaValue::Function(_) => {
            // A chunk-producing function: buffer every piece before
            // compiling
            let mut buffer = String::new();
            loop {
                let results =
                    crate::lua_vm::execute::call_function(ctx.vm(), f.clone(), Vec::new())?;
                match results.first() {
                    None | Some(LuaValue::Nil) => break,
                    Some(LuaValue::String(piece)) => {
                        if piece.is_empty() {
                            break;
                        }
                        buffer.push_str(piece);
                    }
                    Some(_) => {
                        ctx.push(LuaValue::Nil);
                        let m = ctx.intern("reader function must return a string");
                        ctx.push(m);
                        return Ok(2);
                    }
                }
            }
            buffer
        }
        _ => return Err(ctx.bad_argument(1, "string or function")),
    };
    let chunk_name = match ctx.arg(2) {
        LuaValue::Nil => "=(load)".to_string(),
        _ => ctx.check_string(2)?.to_string(),
    };
    let env = ctx.arg(4);
    let loaded = match &env {
        LuaValue::Nil => ctx.vm().load_string(&source, &chunk_name),
        _ => ctx.vm().load_string_with_env(&source, &chunk_name, env),
    };
    match loaded {
        Ok(closure) => {
            ctx.push(closure);
            Ok(1)
        }
        Err(LuaError::Compile(msg)) => {
            ctx.push(LuaValue::Nil);
            let m = ctx.vm().new_string_owned(msg);
            ctx.push(m);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

fn basic_loadfile(ctx: &mut LuaContext) -> LuaResult<usize> {
    let path = ctx.check_string(1)?;
    match ctx.vm().load_file(&path) {
        Ok(closure) => {
            ctx.push(closure);
            Ok(1)
        }
        Err(LuaError::Compile(msg)) => {
            ctx.push(LuaValue::Nil);
            let m = ctx.vm().new_string_owned(msg);
            ctx.push(m);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

fn basic_dofile(ctx: &mut LuaContext) -> LuaResult<usize> {
    let path = ctx.check_string(1)?;
    let closure = ctx.vm().load_file(&path)?;
    let results = crate::lua_vm::execute::call_function(ctx.vm(), closure, Vec::new())?;
    let n = results.len();
    ctx.push_all(results);
    Ok(n)
}

fn basic_unpack(ctx: &mut LuaContext) -> LuaResult<usize> {
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
