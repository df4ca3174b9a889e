// Lua value model: tagged values, tables, prototypes, closures, threads

mod lua_table;
mod lua_thread;
mod lua_value;
mod prototype;

pub use lua_table::{LuaKey, LuaTable};
pub use lua_thread::{CoroutineStatus, LuaThread};
pub use lua_value::{LuaFunction, LuaValue, number_to_string};
pub use prototype::{format_source, LocalVar, Prototype, UpvalDesc};

use crate::lua_vm::{LuaContext, LuaResult};
use smol_str::SmolStr;
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Host function signature: reads arguments and pushes results through the
/// context, returns the number of results pushed.
pub type HostFn = fn(&mut LuaContext) -> LuaResult<usize>;

/// A host (native) function registered with the VM.
///
/// `yieldable` marks functions that participate in the yield protocol;
/// yielding through any other host frame raises
/// "attempt to yield across C-call boundary".
pub struct HostFunction {
    pub name: SmolStr,
    pub func: HostFn,
    pub yieldable: bool,
    /// Captured values for host closures (e.g. coroutine.wrap wrappers).
    pub upvalues: Vec<LuaValue>,
}

impl HostFunction {
    pub fn new(name: &str, func: HostFn) -> Rc<Self> {
        Rc::new(HostFunction {
            name: SmolStr::new(name),
            func,
            yieldable: false,
            upvalues: Vec::new(),
        })
    }

    pub fn new_yieldable(name: &str, func: HostFn) -> Rc<Self> {
        Rc::new(HostFunction {
            name: SmolStr::new(name),
            func,
            yieldable: true,
            upvalues: Vec::new(),
        })
    }

    pub fn closure(name: &str, func: HostFn, upvalues: Vec<LuaValue>) -> Rc<Self> {
        Rc::new(HostFunction {
            name: SmolStr::new(name),
            func,
            yieldable: false,
            upvalues,
        })
    }
}

/// A compiled Lua function instance: prototype plus bound upvalues.
pub struct LuaClosure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<UpvalueRef>,
}

impl LuaClosure {
    pub fn new(proto: Rc<Prototype>, upvalues: Vec<UpvalueRef>) -> Rc<Self> {
        Rc::new(LuaClosure { proto, upvalues })
    }
}

/// An upvalue cell. Open while the captured stack slot is alive, closed
/// (holding the value directly) once the owning frame pops past it.
/// The transition is one-way.
pub enum Upvalue {
    Open {
        owner: Weak<RefCell<LuaThread>>,
        index: usize,
    },
    Closed(LuaValue),
}

pub type UpvalueRef = Rc<RefCell<Upvalue>>;

impl Upvalue {
    pub fn new_closed(value: LuaValue) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Closed(value)))
    }

    pub fn new_open(owner: Weak<RefCell<LuaThread>>, index: usize) -> UpvalueRef {
        Rc::new(RefCell::new(Upvalue::Open { owner, index }))
    }
}

/// Host object carried as a Lua value. The metatable is looked up by
/// `type_name` in the per-state type-metatable registry.
pub struct LuaUserdata {
    pub type_name: SmolStr,
    pub data: RefCell<Box<dyn Any>>,
}

impl LuaUserdata {
    pub fn new(type_name: &str, data: Box<dyn Any>) -> Rc<Self> {
        Rc::new(LuaUserdata {
            type_name: SmolStr::new(type_name),
            data: RefCell::new(data),
        })
    }
}
