/*----------------------------------------------------------------------
  Execution engine.

  Single labeled loop: frames are data, so calls and returns update the
  frame vector and re-enter at 'reentry instead of recursing in Rust.
  Yields and pending host calls unwind only Rust frames belonging to
  the resume/run entry point; the thread's own frame vector stays put,
  which is what makes yield-from-any-Lua-depth work.

  Every observable state change happens at an instruction boundary; the
  frame's pc is committed before each dispatch so hooks, tracebacks and
  suspensions always see a consistent position.
----------------------------------------------------------------------*/

pub mod call;
pub mod metamethod;

mod arithmetic;
mod comparison;
mod concat;
mod table_ops;

pub use call::{
    call_function, deliver_resume_values, prepare_call, resume_body, unwind_to, MAX_FRAMES,
};
pub use comparison::{equals as comparison_equals, less_than as comparison_less_than};
pub use metamethod::{call_metamethod, get_metamethod, get_metatable, MetaEvent};
pub use table_ops::{index_value, len_value, newindex_value};

use crate::lua_value::{LuaThread, LuaValue, Upvalue, UpvalueRef};
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaVM, OpCode};
use std::cell::RefCell;
use std::rc::Rc;

/// SETLIST batch size (fields per flush).
pub const FIELDS_PER_FLUSH: usize = 50;

/// RK operand: constant when the top bit is set, register otherwise.
#[inline(always)]
pub(crate) fn rk(t: &LuaThread, constants: &[LuaValue], base: usize, x: u32) -> LuaValue {
    if Instruction::is_k(x) {
        constants[Instruction::rk_index(x) as usize].clone()
    } else {
        t.stack[base + x as usize].clone()
    }
}

/// Read through an upvalue cell. Open cells deref into the owning
/// thread's stack (usually the current thread).
pub(crate) fn read_upvalue(cur: &Rc<RefCell<LuaThread>>, uv: &UpvalueRef) -> LuaValue {
    let inner = uv.borrow();
    match &*inner {
        Upvalue::Closed(v) => v.clone(),
        Upvalue::Open { owner, index } => match owner.upgrade() {
            Some(o) if Rc::ptr_eq(&o, cur) => cur.borrow().stack[*index].clone(),
            Some(o) => o.borrow().stack[*index].clone(),
            None => LuaValue::Nil,
        },
    }
}

pub(crate) fn write_upvalue(cur: &Rc<RefCell<LuaThread>>, uv: &UpvalueRef, value: LuaValue) {
    let mut inner = uv.borrow_mut();
    match &mut *inner {
        Upvalue::Closed(slot) => *slot = value,
        Upvalue::Open { owner, index } => match owner.upgrade() {
            Some(o) if Rc::ptr_eq(&o, cur) => cur.borrow_mut().stack[*index] = value,
            Some(o) => o.borrow_mut().stack[*index] = value,
            None => {}
        },
    }
}

/// Run the current thread until its frame depth drops to
/// `target_depth`. The entry point for top-level calls, resumes and
/// re-entrant (metamethod/host) calls.
pub fn execute_until(vm: &mut LuaVM, target_depth: usize) -> LuaResult<()> {
    'reentry: loop {
        let cur = vm.current_thread();
        let (closure, base, mut pc) = {
            let t = cur.borrow();
            if t.frames.len() <= target_depth {
                return Ok(());
            }
            let f = t.frames.last().unwrap();
            (f.closure.clone(), f.base, f.pc)
        };
        let proto = closure.proto.clone();

        loop {
            let mut instr = {
                let code = proto.code.borrow();
                if pc >= code.len() {
                    // Defensive: compiled chunks always end in RETURN
                    drop(code);
                    call::do_return(vm, &cur, base, Some(0))?;
                    continue 'reentry;
                }
                code[pc]
            };
            pc += 1;
            // Commit the pc so errors, hooks and suspensions see it
            {
                let mut t = cur.borrow_mut();
                t.frames.last_mut().unwrap().pc = pc;
            }

            let mut op = Instruction::get_opcode(instr);
            if op == OpCode::DebugBreak {
                let Some(dbg) = vm.debugger() else {
                    return Err(
                        vm.rt_error("DEBUG_BREAK trap without an attached debugger".to_string())
                    );
                };
                // The debugger hands back the original instruction for
                // this one re-execution; the trap stays installed.
                instr = {
                    let t = cur.borrow();
                    dbg.handle_debug_break(&t, pc - 1, &closure)
                };
                op = Instruction::get_opcode(instr);
            }

            match op {
                OpCode::Move => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let mut t = cur.borrow_mut();
                    let v = t.stack[base + b].clone();
                    t.stack[base + a] = v;
                }
                OpCode::LoadK => {
                    let a = Instruction::get_a(instr) as usize;
                    let bx = Instruction::get_bx(instr) as usize;
                    let v = proto.constants[bx].clone();
                    cur.borrow_mut().stack[base + a] = v;
                }
                OpCode::LoadBool => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr);
                    let c = Instruction::get_c(instr);
                    cur.borrow_mut().stack[base + a] = LuaValue::Boolean(b != 0);
                    if c != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let mut t = cur.borrow_mut();
                    for i in 0..=b {
                        t.stack[base + a + i] = LuaValue::Nil;
                    }
                }
                OpCode::GetUpval => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let v = read_upvalue(&cur, &closure.upvalues[b]);
                    cur.borrow_mut().stack[base + a] = v;
                }
                OpCode::SetUpval => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let v = cur.borrow().stack[base + a].clone();
                    write_upvalue(&cur, &closure.upvalues[b], v);
                }
                OpCode::GetTabUp => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let table = read_upvalue(&cur, &closure.upvalues[b]);
                    let key = {
                        let t = cur.borrow();
                        rk(&t, &proto.constants, base, Instruction::get_c(instr))
                    };
                    let v = table_ops::index_value(vm, table, key)?;
                    cur.borrow_mut().stack[base + a] = v;
                }
                OpCode::GetTable => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let (obj, key) = {
                        let t = cur.borrow();
                        (
                            t.stack[base + b].clone(),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    let v = table_ops::index_value(vm, obj, key)?;
                    cur.borrow_mut().stack[base + a] = v;
                }
                OpCode::SetTabUp => {
                    let a = Instruction::get_a(instr) as usize;
                    let table = read_upvalue(&cur, &closure.upvalues[a]);
                    let (key, value) = {
                        let t = cur.borrow();
                        (
                            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    table_ops::newindex_value(vm, table, key, value)?;
                }
                OpCode::SetTable => {
                    let a = Instruction::get_a(instr) as usize;
                    let (obj, key, value) = {
                        let t = cur.borrow();
                        (
                            t.stack[base + a].clone(),
                            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    table_ops::newindex_value(vm, obj, key, value)?;
                }
                OpCode::NewTable => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let c = Instruction::get_c(instr) as usize;
                    let table = vm.new_table_with(b, c);
                    cur.borrow_mut().stack[base + a] = table;
                }
                OpCode::Self_ => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let (obj, key) = {
                        let t = cur.borrow();
                        (
                            t.stack[base + b].clone(),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    cur.borrow_mut().stack[base + a + 1] = obj.clone();
                    let method = table_ops::index_value(vm, obj, key)?;
                    cur.borrow_mut().stack[base + a] = method;
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::Pow
                | OpCode::IDiv => {
                    arithmetic::arith(vm, &cur, &proto, base, instr, op)?;
                }
                OpCode::Unm => {
                    arithmetic::unary_minus(vm, &cur, base, instr)?;
                }
                OpCode::Not => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let mut t = cur.borrow_mut();
                    let v = LuaValue::Boolean(!t.stack[base + b].is_truthy());
                    t.stack[base + a] = v;
                }
                OpCode::Len => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let v = cur.borrow().stack[base + b].clone();
                    let len = table_ops::len_value(vm, v)?;
                    cur.borrow_mut().stack[base + a] = len;
                }
                OpCode::Concat => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let c = Instruction::get_c(instr) as usize;
                    let values = {
                        let t = cur.borrow();
                        t.stack[base + b..=base + c].to_vec()
                    };
                    let v = concat::concat_values(vm, values)?;
                    cur.borrow_mut().stack[base + a] = v;
                }
                OpCode::Jmp => {
                    let a = Instruction::get_a(instr) as usize;
                    if a != 0 {
                        cur.borrow_mut().close_upvalues(base + a - 1);
                    }
                    pc = (pc as i64 + Instruction::get_sbx(instr) as i64) as usize;
                }
                OpCode::Eq => {
                    let a = Instruction::get_a(instr);
                    let (vb, vc) = {
                        let t = cur.borrow();
                        (
                            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    let eq = comparison::equals(vm, &vb, &vc)?;
                    if eq != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Lt => {
                    let a = Instruction::get_a(instr);
                    let (vb, vc) = {
                        let t = cur.borrow();
                        (
                            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    let lt = comparison::less_than(vm, &vb, &vc)?;
                    if lt != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Le => {
                    let a = Instruction::get_a(instr);
                    let (vb, vc) = {
                        let t = cur.borrow();
                        (
                            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
                            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
                        )
                    };
                    let le = comparison::less_equal(vm, &vb, &vc)?;
                    if le != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Test => {
                    let a = Instruction::get_a(instr) as usize;
                    let c = Instruction::get_c(instr);
                    let truthy = cur.borrow().stack[base + a].is_truthy();
                    if truthy != (c != 0) {
                        pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let c = Instruction::get_c(instr);
                    let mut t = cur.borrow_mut();
                    let v = t.stack[base + b].clone();
                    if v.is_truthy() == (c != 0) {
                        t.stack[base + a] = v;
                    } else {
                        pc += 1;
                    }
                }
                OpCode::Call => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr);
                    let c = Instruction::get_c(instr);
                    let a_abs = base + a;
                    let nargs = if b == 0 {
                        cur.borrow().top.saturating_sub(a_abs + 1)
                    } else {
                        (b - 1) as usize
                    };
                    let nresults = c as i32 - 1;
                    if vm.cancel.is_cancelled() {
                        return Err(LuaError::Cancelled);
                    }
                    match call::prepare_call(vm, a_abs, nargs, nresults) {
                        Ok(true) => continue 'reentry,
                        Ok(false) => {
                            // Host call done; with a fixed result count
                            // the frame extent is the logical top again
                            if nresults >= 0 {
                                let mut t = cur.borrow_mut();
                                let extent = base + proto.max_stack_size as usize;
                                t.top = extent;
                                let _ = t.ensure_stack(extent);
                            }
                        }
                        Err(LuaError::Yield(values)) => {
                            cur.borrow_mut().resume_target = Some((a_abs, nresults));
                            return Err(LuaError::Yield(values));
                        }
                        Err(LuaError::Pending(token)) => {
                            cur.borrow_mut().resume_target = Some((a_abs, nresults));
                            return Err(LuaError::Pending(token));
                        }
                        Err(e) => return Err(e),
                    }
                }
                OpCode::TailCall => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr);
                    if vm.cancel.is_cancelled() {
                        return Err(LuaError::Cancelled);
                    }
                    call::do_tailcall(vm, &cur, base + a, b)?;
                    continue 'reentry;
                }
                OpCode::Return => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr);
                    let count = if b == 0 { None } else { Some((b - 1) as usize) };
                    call::do_return(vm, &cur, base + a, count)?;
                    continue 'reentry;
                }
                OpCode::ForPrep => {
                    let a = Instruction::get_a(instr) as usize;
                    let (init, limit, step) = {
                        let t = cur.borrow();
                        (
                            t.stack[base + a].clone(),
                            t.stack[base + a + 1].clone(),
                            t.stack[base + a + 2].clone(),
                        )
                    };
                    let init = init
                        .coerce_number()
                        .ok_or_else(|| vm.rt_error("'for' initial value must be a number".to_string()))?;
                    let limit = limit
                        .coerce_number()
                        .ok_or_else(|| vm.rt_error("'for' limit must be a number".to_string()))?;
                    let step = step
                        .coerce_number()
                        .ok_or_else(|| vm.rt_error("'for' step must be a number".to_string()))?;
                    if step == 0.0 {
                        return Err(vm.rt_error("'for' step is zero".to_string()));
                    }
                    {
                        let mut t = cur.borrow_mut();
                        t.stack[base + a] = LuaValue::Number(init - step);
                        t.stack[base + a + 1] = LuaValue::Number(limit);
                        t.stack[base + a + 2] = LuaValue::Number(step);
                    }
                    pc = (pc as i64 + Instruction::get_sbx(instr) as i64) as usize;
                }
                OpCode::ForLoop => {
                    let a = Instruction::get_a(instr) as usize;
                    let mut t = cur.borrow_mut();
                    let idx = t.stack[base + a].as_number().unwrap_or(f64::NAN);
                    let limit = t.stack[base + a + 1].as_number().unwrap_or(f64::NAN);
                    let step = t.stack[base + a + 2].as_number().unwrap_or(f64::NAN);
                    let idx = idx + step;
                    let continues = if step > 0.0 { idx <= limit } else { idx >= limit };
                    if continues {
                        t.stack[base + a] = LuaValue::Number(idx);
                        t.stack[base + a + 3] = LuaValue::Number(idx);
                        pc = (pc as i64 + Instruction::get_sbx(instr) as i64) as usize;
                    }
                }
                OpCode::TForCall => {
                    let a = Instruction::get_a(instr) as usize;
                    let c = Instruction::get_c(instr) as usize;
                    let a_abs = base + a;
                    let (f, s, ctrl) = {
                        let t = cur.borrow();
                        (
                            t.stack[a_abs].clone(),
                            t.stack[a_abs + 1].clone(),
                            t.stack[a_abs + 2].clone(),
                        )
                    };
                    let results = call::call_function(vm, f, vec![s, ctrl])?;
                    let mut t = cur.borrow_mut();
                    t.ensure_stack(a_abs + 3 + c)
                        .map_err(|_| LuaError::StackOverflow)?;
                    for i in 0..c {
                        t.stack[a_abs + 3 + i] =
                            results.get(i).cloned().unwrap_or(LuaValue::Nil);
                    }
                }
                OpCode::TForLoop => {
                    let a = Instruction::get_a(instr) as usize;
                    let mut t = cur.borrow_mut();
                    let ctrl = t.stack[base + a + 1].clone();
                    if !ctrl.is_nil() {
                        t.stack[base + a] = ctrl;
                        pc = (pc as i64 + Instruction::get_sbx(instr) as i64) as usize;
                    }
                }
                OpCode::SetList => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr) as usize;
                    let mut c = Instruction::get_c(instr) as usize;
                    let a_abs = base + a;
                    if c == 0 {
                        let extra = proto.code.borrow()[pc];
                        pc += 1;
                        c = Instruction::get_ax(extra) as usize;
                    }
                    let n = if b == 0 {
                        cur.borrow().top.saturating_sub(a_abs + 1)
                    } else {
                        b
                    };
                    let first = (c - 1) * FIELDS_PER_FLUSH;
                    {
                        let t = cur.borrow();
                        let table = t.stack[a_abs].as_table().cloned().ok_or_else(|| {
                            vm.rt_error("SETLIST target is not a table".to_string())
                        })?;
                        let mut tbl = table.borrow_mut();
                        for i in 1..=n {
                            tbl.raw_seti((first + i) as i64, t.stack[a_abs + i].clone());
                        }
                    }
                    // The batch is consumed: the logical top returns to
                    // the frame extent
                    let mut t = cur.borrow_mut();
                    let extent = base + proto.max_stack_size as usize;
                    t.top = extent;
                    let _ = t.ensure_stack(extent);
                }
                OpCode::Closure => {
                    let a = Instruction::get_a(instr) as usize;
                    let bx = Instruction::get_bx(instr) as usize;
                    let sub = proto.protos[bx].clone();
                    let mut t = cur.borrow_mut();
                    let mut upvalues = Vec::with_capacity(sub.upvalues.len());
                    for desc in &sub.upvalues {
                        if desc.in_stack {
                            let uv =
                                t.find_upvalue(Rc::downgrade(&cur), base + desc.index as usize);
                            upvalues.push(uv);
                        } else {
                            upvalues.push(closure.upvalues[desc.index as usize].clone());
                        }
                    }
                    let new_closure = crate::lua_value::LuaClosure::new(sub, upvalues);
                    t.stack[base + a] = LuaValue::closure(new_closure);
                }
                OpCode::Vararg => {
                    let a = Instruction::get_a(instr) as usize;
                    let b = Instruction::get_b(instr);
                    let a_abs = base + a;
                    let mut t = cur.borrow_mut();
                    let (vstart, vcount) = {
                        let f = t.frames.last().unwrap();
                        (f.vararg_start(), f.vararg_count)
                    };
                    if b == 0 {
                        t.ensure_stack(a_abs + vcount)
                            .map_err(|_| LuaError::StackOverflow)?;
                        for i in 0..vcount {
                            let v = t.stack[vstart + i].clone();
                            t.stack[a_abs + i] = v;
                        }
                        t.top = a_abs + vcount;
                    } else {
                        let want = (b - 1) as usize;
                        for i in 0..want {
                            let v = if i < vcount {
                                t.stack[vstart + i].clone()
                            } else {
                                LuaValue::Nil
                            };
                            t.stack[a_abs + i] = v;
                        }
                    }
                }
                OpCode::ExtraArg => {
                    // Only meaningful as the trailing word of SETLIST;
                    // standalone it is a no-op
                }
                OpCode::DebugBreak => {
                    return Err(
                        vm.rt_error("debugger returned DEBUG_BREAK as replacement".to_string())
                    );
                }
            }
        }
    }
}
