// Engine-side debugger interface: trap dispatch and frame hooks
use crate::*;
use std::cell::Cell;
use std::rc::Rc;

/// Minimal debugger: one installed trap, counts events, hands the
/// original instruction back on every hit.
struct ProbeDebugger {
    original: Cell<u32>,
    trap_pc: Cell<usize>,
    hits: Cell<usize>,
    registered: Cell<usize>,
    pushes: Cell<usize>,
    pops: Cell<usize>,
    seen_line: Cell<u32>,
    seen_locals: std::cell::RefCell<Vec<String>>,
}

impl ProbeDebugger {
    fn new() -> Rc<Self> {
        Rc::new(ProbeDebugger {
            original: Cell::new(0),
            trap_pc: Cell::new(usize::MAX),
            hits: Cell::new(0),
            registered: Cell::new(0),
            pushes: Cell::new(0),
            pops: Cell::new(0),
            seen_line: Cell::new(0),
            seen_locals: std::cell::RefCell::new(Vec::new()),
        })
    }

    /// Swap the instruction at (proto, pc) for the reserved trap.
    fn install(&self, proto: &Prototype, pc: usize) {
        let mut code = proto.code.borrow_mut();
        self.original.set(code[pc]);
        self.trap_pc.set(pc);
        code[pc] = Instruction::create_abc(OpCode::DebugBreak, 0, 0, 0);
    }
}

impl LuaDebugger for ProbeDebugger {
    fn register_prototype(&self, _proto: &Rc<Prototype>) {
        self.registered.set(self.registered.get() + 1);
    }

    fn on_frame_push(&self, _thread: &LuaThread) {
        self.pushes.set(self.pushes.get() + 1);
    }

    fn on_frame_pop(&self, _thread: &LuaThread, _popped: &CallFrame) {
        self.pops.set(self.pops.get() + 1);
    }

    fn handle_debug_break(&self, thread: &LuaThread, pc: usize, closure: &Rc<LuaClosure>) -> u32 {
        assert_eq!(pc, self.trap_pc.get());
        self.hits.set(self.hits.get() + 1);
        self.seen_line.set(closure.proto.line_at(pc));
        let frame = thread.current_frame().unwrap();
        let mut names = Vec::new();
        for local in closure.proto.locals_at(pc) {
            let value = thread.stack[frame.base + local.register as usize].clone();
            names.push(format!("{}={}", local.name, value.display()));
        }
        *self.seen_locals.borrow_mut() = names;
        self.original.get()
    }
}

fn lua_closure(func: &LuaValue) -> Rc<LuaClosure> {
    match func {
        LuaValue::Function(LuaFunction::Lua(c)) => c.clone(),
        _ => panic!("not a Lua closure"),
    }
}

#[test]
fn test_register_prototype_walks_tree() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let dbg = ProbeDebugger::new();
    vm.set_debugger(dbg.clone());
    vm.load_string(
        "local function a() end local function b() local function c() end end",
        "@tree.lua",
    )
    .unwrap();
    // main chunk + a + b + c
    assert_eq!(dbg.registered.get(), 4);
}

#[test]
fn test_trap_fires_and_execution_is_transparent() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let dbg = ProbeDebugger::new();
    vm.set_debugger(dbg.clone());

    let func = vm
        .load_string(
            "local a = 1\nlocal b = a + 1\nreturn b * 2",
            "@t.lua",
        )
        .unwrap();
    let closure = lua_closure(&func);
    let proto = closure.proto.clone();

    // First pc on line 2
    let pc = proto
        .line_info
        .iter()
        .position(|&l| l == 2)
        .expect("line 2 has code");
    dbg.install(&proto, pc);

    let results = vm.call(func, vec![]).unwrap();
    // The trap fired exactly once and the program ran unchanged
    assert_eq!(dbg.hits.get(), 1);
    assert_eq!(dbg.seen_line.get(), 2);
    assert_eq!(results[0].as_number(), Some(4.0));

    // The trap is still installed after the run (transparent re-execution)
    assert_eq!(
        Instruction::get_opcode(proto.code.borrow()[pc]),
        OpCode::DebugBreak
    );
}

#[test]
fn test_trap_reports_locals_in_scope() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let dbg = ProbeDebugger::new();
    vm.set_debugger(dbg.clone());

    let func = vm
        .load_string("local first = 10\nlocal second = first + 1\nreturn second", "@locals.lua")
        .unwrap();
    let closure = lua_closure(&func);
    let proto = closure.proto.clone();
    let pc = proto
        .line_info
        .iter()
        .position(|&l| l == 3)
        .expect("line 3 has code");
    dbg.install(&proto, pc);

    let results = vm.call(func, vec![]).unwrap();
    assert_eq!(results[0].as_number(), Some(11.0));
    let locals = dbg.seen_locals.borrow();
    assert!(locals.iter().any(|l| l == "first=10"), "locals: {:?}", locals);
    assert!(locals.iter().any(|l| l == "second=11"), "locals: {:?}", locals);
}

#[test]
fn test_frame_hooks_fire() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let dbg = ProbeDebugger::new();
    vm.set_debugger(dbg.clone());
    vm.execute(
        r#"
        local function f() return 1 end
        local function g() return f() + f() end
        return g()
    "#,
    )
    .unwrap();
    // chunk, g, and two f calls (tail-call replacement also pops)
    assert!(dbg.pushes.get() >= 4);
    assert_eq!(dbg.pushes.get(), dbg.pops.get());
}

#[test]
fn test_install_remove_restores_code() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let func = vm
        .load_string("return 1 + 2", "@restore.lua")
        .unwrap();
    let closure = lua_closure(&func);
    let proto = closure.proto.clone();
    let before = proto.code_snapshot();

    let dbg = ProbeDebugger::new();
    dbg.install(&proto, 0);
    assert_ne!(proto.code_snapshot(), before);
    // Removing the breakpoint restores bit-identical code
    proto.code.borrow_mut()[0] = dbg.original.get();
    assert_eq!(proto.code_snapshot(), before);
}
