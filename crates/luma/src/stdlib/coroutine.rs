// Coroutine library: create, resume, yield, status, running, wrap,
// isyieldable. yield is registered as yieldable so the signal passes
// its own host frame; everything else is an ordinary C-call boundary.

use crate::lib_registry::{LibraryEntry, LibraryModule};
use crate::lua_value::{HostFunction, LuaValue};
use crate::lua_vm::{LuaContext, LuaError, LuaResult};
use std::rc::Rc;

pub fn create_coroutine_lib() -> LibraryModule {
    let mut module = crate::lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "status" => coroutine_status,
        "running" => coroutine_running,
        "wrap" => coroutine_wrap,
    });
    module
        .entries
        .push(("yield", LibraryEntry::Yieldable(coroutine_yield)));
    // Yieldable-flagged so its own frame is not a C-call boundary,
    // otherwise it could never answer true
    module
        .entries
        .push(("isyieldable", LibraryEntry::Yieldable(coroutine_isyieldable)));
    module
}

fn coroutine_create(ctx: &mut LuaContext) -> LuaResult<usize> {
    let func = ctx.check_function(1)?;
    let thread = ctx.vm().new_coroutine(func);
    ctx.push(thread);
    Ok(1)
}

fn coroutine_resume(ctx: &mut LuaContext) -> LuaResult<usize> {
    let co = ctx.check_thread(1)?;
    let args = ctx.args()[1..].to_vec();
    let (ok, results) = ctx.vm().resume(co, args)?;
    ctx.push(LuaValue::Boolean(ok));
    let n = results.len();
    ctx.push_all(results);
    Ok(1 + n)
}

fn coroutine_yield(ctx: &mut LuaContext) -> LuaResult<usize> {
    let values = ctx.args();
    Err(ctx.do_yield(values))
}

fn coroutine_status(ctx: &mut LuaContext) -> LuaResult<usize> {
    let co = ctx.check_thread(1)?;
    let current = ctx.vm_ref().current_thread();
    let status = if Rc::ptr_eq(&co, &current) {
        "running"
    } else {
        co.borrow().status.as_str()
    };
    let v = ctx.intern(status);
    ctx.push(v);
    Ok(1)
}

fn coroutine_running(ctx: &mut LuaContext) -> LuaResult<usize> {
    let current = ctx.vm_ref().current_thread();
    let is_main = ctx.vm_ref().is_current_main();
    ctx.push(LuaValue::Thread(current));
    ctx.push(LuaValue::Boolean(is_main));
    Ok(2)
}

fn coroutine_wrap(ctx: &mut LuaContext) -> LuaResult<usize> {
    let func = ctx.check_function(1)?;
    let thread = ctx.vm().new_coroutine(func);
    let wrapper = LuaValue::host_function(HostFunction::closure(
        "wrap",
        coroutine_wrap_call,
        vec![thread],
    ));
    ctx.push(wrapper);
    Ok(1)
}

/// Invoked when a wrapped coroutine is called: resume, raising the
/// error on failure instead of returning a status flag.
fn coroutine_wrap_call(ctx: &mut LuaContext) -> LuaResult<usize> {
    let thread = match ctx.upvalue(0) {
        LuaValue::Thread(t) => t,
        _ => return Err(LuaError::runtime("invalid wrapped coroutine".to_string())),
    };
    let args = ctx.args();
    let (ok, results) = ctx.vm().resume(thread, args)?;
    if !ok {
        let err = results.into_iter().next().unwrap_or(LuaValue::Nil);
        return Err(ctx.vm().rt_error_value(err));
    }
    let n = results.len();
    ctx.push_all(results);
    Ok(n)
}

fn coroutine_isyieldable(ctx: &mut LuaContext) -> LuaResult<usize> {
    let yieldable = {
        let current = ctx.vm_ref().current_thread();
        let t = current.borrow();
        !t.is_main && t.nny == 0
    };
    ctx.push(LuaValue::Boolean(yieldable));
    Ok(1)
}
