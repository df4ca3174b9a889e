// Arithmetic instructions: IEEE double fast path, string->number
// coercion, metamethod fallback.

use crate::lua_value::{LuaThread, LuaValue, Prototype};
use crate::lua_vm::execute::metamethod::{self, MetaEvent};
use crate::lua_vm::execute::rk;
use crate::lua_vm::{Instruction, LuaResult, LuaVM, OpCode};
use std::cell::RefCell;
use std::rc::Rc;

#[inline]
fn apply(op: OpCode, x: f64, y: f64) -> f64 {
    match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => x / y,
        // Lua definition: a - floor(a/b)*b
        OpCode::Mod => x - (x / y).floor() * y,
        OpCode::Pow => x.powf(y),
        OpCode::IDiv => (x / y).floor(),
        _ => unreachable!("not an arithmetic opcode"),
    }
}

/// Binary arithmetic dispatch for ADD..POW and IDIV.
pub fn arith(
    vm: &mut LuaVM,
    cur: &Rc<RefCell<LuaThread>>,
    proto: &Rc<Prototype>,
    base: usize,
    instr: u32,
    op: OpCode,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let (vb, vc) = {
        let t = cur.borrow();
        (
            rk(&t, &proto.constants, base, Instruction::get_b(instr)),
            rk(&t, &proto.constants, base, Instruction::get_c(instr)),
        )
    };
    if let (Some(x), Some(y)) = (vb.coerce_number(), vc.coerce_number()) {
        cur.borrow_mut().stack[base + a] = LuaValue::Number(apply(op, x, y));
        return Ok(());
    }
    let event = MetaEvent::from_arith_op(op);
    let handler = metamethod::get_metamethod(vm, &vb, event)
        .or_else(|| metamethod::get_metamethod(vm, &vc, event))
        .ok_or_else(|| {
            let bad = if vb.coerce_number().is_none() { &vb } else { &vc };
            vm.rt_error(format!(
                "attempt to perform arithmetic on a {} value",
                bad.type_name()
            ))
        })?;
    let result = metamethod::call_metamethod(vm, handler, vec![vb, vc])?;
    cur.borrow_mut().stack[base + a] = result;
    Ok(())
}

/// UNM: negate R[B], falling back to __unm with the operand doubled.
pub fn unary_minus(
    vm: &mut LuaVM,
    cur: &Rc<RefCell<LuaThread>>,
    base: usize,
    instr: u32,
) -> LuaResult<()> {
    let a = Instruction::get_a(instr) as usize;
    let b = Instruction::get_b(instr) as usize;
    let v = cur.borrow().stack[base + b].clone();
    if let Some(n) = v.coerce_number() {
        cur.borrow_mut().stack[base + a] = LuaValue::Number(-n);
        return Ok(());
    }
    let handler = metamethod::get_metamethod(vm, &v, MetaEvent::Unm).ok_or_else(|| {
        vm.rt_error(format!(
            "attempt to perform arithmetic on a {} value",
            v.type_name()
        ))
    })?;
    let result = metamethod::call_metamethod(vm, handler, vec![v.clone(), v])?;
    cur.borrow_mut().stack[base + a] = result;
    Ok(())
}
