// Metamethod resolution and invocation.
// Each originating operation performs at most one metamethod call;
// chained __index/__newindex hops are raw lookups plus possibly the
// next hop's own metamethod.

use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::execute::call;
use crate::lua_vm::{LuaResult, LuaVM, OpCode};
use std::cell::RefCell;
use std::rc::Rc;

/// Metamethod events, indexing the VM's interned key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MetaEvent {
    Index = 0,
    NewIndex,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    IDiv,
    Concat,
    Len,
    Eq,
    Lt,
    Le,
    Call,
    ToString,
    Pairs,
    Metatable,
}

impl MetaEvent {
    pub const ALL: [MetaEvent; 19] = [
        MetaEvent::Index,
        MetaEvent::NewIndex,
        MetaEvent::Add,
        MetaEvent::Sub,
        MetaEvent::Mul,
        MetaEvent::Div,
        MetaEvent::Mod,
        MetaEvent::Pow,
        MetaEvent::Unm,
        MetaEvent::IDiv,
        MetaEvent::Concat,
        MetaEvent::Len,
        MetaEvent::Eq,
        MetaEvent::Lt,
        MetaEvent::Le,
        MetaEvent::Call,
        MetaEvent::ToString,
        MetaEvent::Pairs,
        MetaEvent::Metatable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetaEvent::Index => "__index",
            MetaEvent::NewIndex => "__newindex",
            MetaEvent::Add => "__add",
            MetaEvent::Sub => "__sub",
            MetaEvent::Mul => "__mul",
            MetaEvent::Div => "__div",
            MetaEvent::Mod => "__mod",
            MetaEvent::Pow => "__pow",
            MetaEvent::Unm => "__unm",
            MetaEvent::IDiv => "__idiv",
            MetaEvent::Concat => "__concat",
            MetaEvent::Len => "__len",
            MetaEvent::Eq => "__eq",
            MetaEvent::Lt => "__lt",
            MetaEvent::Le => "__le",
            MetaEvent::Call => "__call",
            MetaEvent::ToString => "__tostring",
            MetaEvent::Pairs => "__pairs",
            MetaEvent::Metatable => "__metatable",
        }
    }

    /// Event for an arithmetic opcode.
    pub fn from_arith_op(op: OpCode) -> MetaEvent {
        match op {
            OpCode::Add => MetaEvent::Add,
            OpCode::Sub => MetaEvent::Sub,
            OpCode::Mul => MetaEvent::Mul,
            OpCode::Div => MetaEvent::Div,
            OpCode::Mod => MetaEvent::Mod,
            OpCode::Pow => MetaEvent::Pow,
            OpCode::IDiv => MetaEvent::IDiv,
            _ => MetaEvent::Unm,
        }
    }
}

/// Metatable of a value: tables carry their own, strings share the
/// per-state string metatable, userdata resolve through the type
/// registry, everything else through a per-type-name entry (if any).
pub fn get_metatable(vm: &LuaVM, value: &LuaValue) -> Option<Rc<RefCell<LuaTable>>> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::String(_) => vm.string_mt.clone(),
        LuaValue::UserData(u) => vm.type_metatables.get(u.type_name.as_str()).cloned(),
        LuaValue::LightUserData(_) => vm.type_metatables.get("lightuserdata").cloned(),
        other => vm.type_metatables.get(other.type_name()).cloned(),
    }
}

/// Metamethod slot for an event, nil mapped to None.
pub fn get_metamethod(vm: &LuaVM, value: &LuaValue, event: MetaEvent) -> Option<LuaValue> {
    let mt = get_metatable(vm, value)?;
    let key = LuaValue::String(vm.meta_key(event));
    let handler = mt.borrow().raw_get(&key);
    if handler.is_nil() { None } else { Some(handler) }
}

/// Call a metamethod and keep its first result.
pub fn call_metamethod(vm: &mut LuaVM, handler: LuaValue, args: Vec<LuaValue>) -> LuaResult<LuaValue> {
    let mut results = call::call_function(vm, handler, args)?;
    Ok(if results.is_empty() {
        LuaValue::Nil
    } else {
        results.remove(0)
    })
}
