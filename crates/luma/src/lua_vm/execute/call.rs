// Call and return protocol: frame push/pop, host calls, tail calls,
// re-entrant calls for metamethods and host code, unwinding, and the
// coroutine resume body.

use crate::lua_value::{HostFunction, LuaClosure, LuaFunction, LuaThread, LuaValue};
use crate::lua_vm::execute::metamethod::{self, MetaEvent};
use crate::lua_vm::execute::execute_until;
use crate::lua_vm::{CallFrame, LuaContext, LuaError, LuaResult, LuaVM};
use std::cell::RefCell;
use std::rc::Rc;

/// Call-frame depth ceiling per thread.
pub const MAX_FRAMES: usize = 200_000;

/// Bound on chained `__call` resolutions.
const MAX_CALL_CHAIN: usize = 16;

/// Resolve and begin a call to the value at `func_pos` with `nargs`
/// arguments above it. Lua callees get a frame pushed (returns true);
/// host callees run to completion with results written in place
/// (returns false). Non-functions resolve through `__call`.
pub fn prepare_call(
    vm: &mut LuaVM,
    func_pos: usize,
    nargs: usize,
    nresults: i32,
) -> LuaResult<bool> {
    let cur = vm.current_thread();
    let mut func = cur.borrow().stack[func_pos].clone();
    let mut nargs = nargs;
    let mut chain = 0;
    loop {
        match &func {
            LuaValue::Function(LuaFunction::Lua(closure)) => {
                push_lua_frame(vm, closure.clone(), func.clone(), func_pos, nargs, nresults)?;
                return Ok(true);
            }
            LuaValue::Function(LuaFunction::Host(host)) => {
                call_host(vm, host.clone(), func_pos, nargs, nresults)?;
                return Ok(false);
            }
            other => {
                let Some(mm) = metamethod::get_metamethod(vm, other, MetaEvent::Call) else {
                    return Err(
                        vm.rt_error(format!("attempt to call a {} value", other.type_name()))
                    );
                };
                chain += 1;
                if chain > MAX_CALL_CHAIN {
                    return Err(vm.rt_error("'__call' chain too long".to_string()));
                }
                // The original callee becomes the first argument
                let mut t = cur.borrow_mut();
                t.ensure_stack(func_pos + 2 + nargs)
                    .map_err(|_| LuaError::StackOverflow)?;
                for i in (0..=nargs).rev() {
                    let v = t.stack[func_pos + i].clone();
                    t.stack[func_pos + i + 1] = v;
                }
                t.stack[func_pos] = mm.clone();
                if t.top < func_pos + 2 + nargs {
                    t.top = func_pos + 2 + nargs;
                }
                drop(t);
                nargs += 1;
                func = mm;
            }
        }
    }
}

fn push_lua_frame(
    vm: &mut LuaVM,
    closure: Rc<LuaClosure>,
    func_value: LuaValue,
    func_pos: usize,
    nargs: usize,
    nresults: i32,
) -> LuaResult<()> {
    let cur = vm.current_thread();
    {
        let mut t = cur.borrow_mut();
        if t.frames.len() >= MAX_FRAMES {
            return Err(LuaError::StackOverflow);
        }
        let proto = closure.proto.clone();
        let num_params = proto.num_params as usize;
        let max_stack = proto.max_stack_size as usize;

        let (base, vararg_count) = if proto.is_vararg {
            // Fixed parameters are copied above the incoming arguments;
            // the variadic region stays at [base - extra, base).
            let base = func_pos + 1 + nargs;
            let extra = nargs.saturating_sub(num_params);
            t.ensure_stack(base + max_stack)
                .map_err(|_| LuaError::StackOverflow)?;
            for i in 0..num_params {
                let v = if i < nargs {
                    t.stack[func_pos + 1 + i].clone()
                } else {
                    LuaValue::Nil
                };
                t.stack[base + i] = v;
            }
            (base, extra)
        } else {
            let base = func_pos + 1;
            t.ensure_stack(base + max_stack)
                .map_err(|_| LuaError::StackOverflow)?;
            for i in nargs..num_params {
                t.stack[base + i] = LuaValue::Nil;
            }
            (base, 0)
        };
        // Registers above the parameters start out nil
        for i in num_params..max_stack {
            t.stack[base + i] = LuaValue::Nil;
        }
        t.top = base + max_stack;
        t.frames.push(CallFrame::new(
            func_value,
            closure,
            base,
            func_pos,
            nresults,
            vararg_count,
        ));
    }
    if let Some(dbg) = vm.debugger() {
        let t = cur.borrow();
        dbg.on_frame_push(&t);
    }
    Ok(())
}

/// Run a host function synchronously and write its results at
/// `func_pos` according to `nresults` (-1 = all).
fn call_host(
    vm: &mut LuaVM,
    host: Rc<HostFunction>,
    func_pos: usize,
    nargs: usize,
    nresults: i32,
) -> LuaResult<()> {
    let cur = vm.current_thread();
    {
        let mut t = cur.borrow_mut();
        t.host_frames.push(host.name.clone());
        if !host.yieldable {
            t.nny += 1;
        }
    }
    let outcome = {
        let mut ctx = LuaContext::new(vm, host.clone(), func_pos + 1, nargs);
        match (host.func)(&mut ctx) {
            Ok(n) => {
                let mut results = std::mem::take(&mut ctx.results);
                results.truncate(n);
                Ok(results)
            }
            Err(e) => Err(e),
        }
    };
    {
        let mut t = cur.borrow_mut();
        t.host_frames.pop();
        if !host.yieldable {
            t.nny -= 1;
        }
    }
    let results = outcome?;

    let mut t = cur.borrow_mut();
    let n = results.len();
    let needed = func_pos + n.max(nresults.max(0) as usize);
    t.ensure_stack(needed).map_err(|_| LuaError::StackOverflow)?;
    for (i, v) in results.into_iter().enumerate() {
        t.stack[func_pos + i] = v;
    }
    if nresults >= 0 {
        for i in n..nresults as usize {
            t.stack[func_pos + i] = LuaValue::Nil;
        }
        t.top = func_pos + nresults as usize;
    } else {
        t.top = func_pos + n;
    }
    Ok(())
}

/// RETURN: close upvalues, copy results to the caller's slot, pop the
/// frame. `count` of None means "to top".
pub fn do_return(
    vm: &mut LuaVM,
    cur: &Rc<RefCell<LuaThread>>,
    first: usize,
    count: Option<usize>,
) -> LuaResult<()> {
    let popped = {
        let mut t = cur.borrow_mut();
        let (base, return_base, want) = {
            let frame = t.frames.last().expect("RETURN without a frame");
            (frame.base, frame.return_base, frame.nresults)
        };
        let n = count.unwrap_or_else(|| t.top.saturating_sub(first));
        t.close_upvalues(base);
        let needed = return_base + n.max(want.max(0) as usize);
        t.ensure_stack(needed).map_err(|_| LuaError::StackOverflow)?;
        for i in 0..n {
            let v = t.stack[first + i].clone();
            t.stack[return_base + i] = v;
        }
        if want >= 0 {
            for i in n..want as usize {
                t.stack[return_base + i] = LuaValue::Nil;
            }
            t.top = return_base + want as usize;
        } else {
            t.top = return_base + n;
        }
        let popped = t.frames.pop().unwrap();
        // With a fixed result count nothing is in flight, so the
        // caller's register extent becomes the logical top again
        if want >= 0 {
            let extent = t
                .frames
                .last()
                .map(|f| f.base + f.closure.proto.max_stack_size as usize);
            if let Some(extent) = extent {
                t.top = extent;
                let _ = t.ensure_stack(extent);
            }
        }
        popped
    };
    if let Some(dbg) = vm.debugger() {
        let t = cur.borrow();
        dbg.on_frame_pop(&t, &popped);
    }
    Ok(())
}

/// TAILCALL: replace the current frame. The outgoing frame's upvalues
/// are closed first; the callee inherits the caller's result protocol.
pub fn do_tailcall(
    vm: &mut LuaVM,
    cur: &Rc<RefCell<LuaThread>>,
    a_abs: usize,
    b: u32,
) -> LuaResult<()> {
    let (func_pos, nargs, want) = {
        let mut t = cur.borrow_mut();
        let (base, return_base, want) = {
            let frame = t.frames.last().expect("TAILCALL without a frame");
            (frame.base, frame.return_base, frame.nresults)
        };
        let nargs = if b == 0 {
            t.top.saturating_sub(a_abs + 1)
        } else {
            (b - 1) as usize
        };
        t.close_upvalues(base);
        // Slide callee and arguments down over the outgoing frame
        for i in 0..=nargs {
            let v = t.stack[a_abs + i].clone();
            t.stack[return_base + i] = v;
        }
        t.top = return_base + nargs + 1;
        (return_base, nargs, want)
    };
    let popped = { cur.borrow_mut().frames.pop().unwrap() };
    if let Some(dbg) = vm.debugger() {
        let t = cur.borrow();
        dbg.on_frame_pop(&t, &popped);
    }
    match prepare_call(vm, func_pos, nargs, want) {
        Ok(true) => {
            let mut t = cur.borrow_mut();
            t.frames.last_mut().unwrap().is_tail = true;
            Ok(())
        }
        Ok(false) => {
            if want >= 0 {
                let mut t = cur.borrow_mut();
                let extent = t
                    .frames
                    .last()
                    .map(|f| f.base + f.closure.proto.max_stack_size as usize);
                if let Some(extent) = extent {
                    t.top = extent;
                    let _ = t.ensure_stack(extent);
                }
            }
            Ok(())
        }
        Err(LuaError::Yield(values)) => {
            cur.borrow_mut().resume_target = Some((func_pos, want));
            Err(LuaError::Yield(values))
        }
        Err(LuaError::Pending(token)) => {
            cur.borrow_mut().resume_target = Some((func_pos, want));
            Err(LuaError::Pending(token))
        }
        Err(e) => Err(e),
    }
}

/// Re-entrant call used by metamethods, iterators and host code:
/// pushes the call above the logical top, runs it to completion and
/// collects all results. A Rust-recursive boundary, so yields inside
/// are rejected as crossing a C-call boundary.
pub fn call_function(vm: &mut LuaVM, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if vm.cancel.is_cancelled() {
        return Err(LuaError::Cancelled);
    }
    let cur = vm.current_thread();
    let (func_pos, depth, nargs) = {
        let mut t = cur.borrow_mut();
        let func_pos = t.top;
        let nargs = args.len();
        t.ensure_stack(func_pos + 1 + nargs)
            .map_err(|_| LuaError::StackOverflow)?;
        t.stack[func_pos] = func;
        for (i, a) in args.into_iter().enumerate() {
            t.stack[func_pos + 1 + i] = a;
        }
        t.top = func_pos + 1 + nargs;
        (func_pos, t.frames.len(), nargs)
    };
    let pushed = prepare_call(vm, func_pos, nargs, -1)?;
    if pushed {
        // Only a nested call is a C-call boundary; the outermost entry
        // has no Rust dispatch frame beneath it to lose on suspension.
        let reentrant = depth > 0;
        if reentrant {
            cur.borrow_mut().nny += 1;
        }
        let r = execute_until(vm, depth);
        if reentrant {
            cur.borrow_mut().nny -= 1;
        }
        r?;
    }
    let mut t = cur.borrow_mut();
    let results = t.stack[func_pos..t.top].to_vec();
    t.top = func_pos;
    Ok(results)
}

/// Pop frames of the current thread down to `depth`, closing upvalues
/// and firing frame-pop hooks, then restore the logical top.
pub fn unwind_to(vm: &mut LuaVM, depth: usize, top: usize) {
    let cur = vm.current_thread();
    loop {
        let popped = {
            let mut t = cur.borrow_mut();
            if t.frames.len() <= depth {
                t.top = top.min(t.stack.len());
                None
            } else {
                let f = t.frames.pop().unwrap();
                t.close_upvalues(f.base);
                Some(f)
            }
        };
        match popped {
            Some(f) => {
                if let Some(dbg) = vm.debugger() {
                    let t = cur.borrow();
                    dbg.on_frame_pop(&t, &f);
                }
            }
            None => break,
        }
    }
}

/// Body of a resume, run with `co` already installed as the current
/// thread. First resume starts the entry function with `args` as its
/// parameters; later resumes deliver `args` as the results of the
/// suspended yield.
pub fn resume_body(
    vm: &mut LuaVM,
    co: &Rc<RefCell<LuaThread>>,
    args: Vec<LuaValue>,
) -> LuaResult<Vec<LuaValue>> {
    let entry = co.borrow_mut().entry.take();
    match entry {
        Some(func) => {
            let nargs = args.len();
            {
                let mut t = co.borrow_mut();
                t.stack.clear();
                t.stack.push(func);
                t.stack.extend(args);
                t.top = 1 + nargs;
            }
            let pushed = prepare_call(vm, 0, nargs, -1)?;
            if pushed {
                execute_until(vm, 0)?;
            }
        }
        None => {
            deliver_resume_values(co, args);
            execute_until(vm, 0)?;
        }
    }
    let mut t = co.borrow_mut();
    let results = t.stack[0..t.top].to_vec();
    t.top = 0;
    Ok(results)
}

/// Write resumed (or pending-completion) values into the slot recorded
/// when the thread suspended.
pub fn deliver_resume_values(co: &Rc<RefCell<LuaThread>>, values: Vec<LuaValue>) {
    let mut t = co.borrow_mut();
    match t.resume_target.take() {
        Some((dest, want)) => {
            if want >= 0 {
                let want = want as usize;
                let _ = t.ensure_stack(dest + want);
                for i in 0..want {
                    t.stack[dest + i] = values.get(i).cloned().unwrap_or(LuaValue::Nil);
                }
                let frame_top = t
                    .frames
                    .last()
                    .map(|f| f.base + f.closure.proto.max_stack_size as usize);
                if let Some(frame_top) = frame_top {
                    t.top = frame_top;
                }
            } else {
                let n = values.len();
                let _ = t.ensure_stack(dest + n);
                for (i, v) in values.into_iter().enumerate() {
                    t.stack[dest + i] = v;
                }
                t.top = dest + n;
            }
        }
        None => {
            let n = values.len();
            let _ = t.ensure_stack(n);
            for (i, v) in values.into_iter().enumerate() {
                t.stack[i] = v;
            }
            t.top = n;
        }
    }
}
