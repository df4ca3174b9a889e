// End-to-end debug sessions: the VM runs on the test thread while a
// controller thread drives breakpoints and stepping over the command
// queue, exactly as a debug-adapter reader thread would.

use luma::{LuaFunction, LuaValue, LuaVM};
use luma_debugger::{StopEvent, StopReason, VmDebugger};
use std::thread;

fn lua_proto(func: &LuaValue) -> std::rc::Rc<luma::Prototype> {
    match func {
        LuaValue::Function(LuaFunction::Lua(c)) => c.proto.clone(),
        _ => panic!("not a Lua closure"),
    }
}

#[test]
fn test_breakpoint_hit_reports_line_and_locals() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    // Breakpoint requested before the chunk loads; installed when the
    // prototype registers
    control.set_breakpoint("t.lua", 2);
    let func = vm
        .load_string("local a = 1\nlocal b = a + 1\nreturn a + b", "@t.lua")
        .unwrap();

    let controller = thread::spawn(move || -> Option<StopEvent> {
        let stop = control.wait_stop();
        control.resume();
        stop
    });

    let results = vm.call(func, vec![]).unwrap();
    let stop = controller.join().unwrap().expect("a stop event");

    assert_eq!(results[0].as_number(), Some(3.0));
    assert_eq!(debugger.stop_count(), 1);
    assert_eq!(stop.reason, StopReason::Breakpoint);
    assert_eq!(stop.source, "t.lua");
    assert_eq!(stop.line, 2);
    // Locals in scope at the stopped pc include everything declared
    // in a scope containing it
    let top = &stop.frames[0];
    assert!(
        top.locals.iter().any(|v| v.name == "a" && v.value == "1"),
        "locals: {:?}",
        top.locals
    );
}

#[test]
fn test_breakpoint_transparency() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    let func = vm
        .load_string("local a = 1\nlocal b = 2\nreturn a + b", "@snap.lua")
        .unwrap();
    let proto = lua_proto(&func);
    let pristine = proto.code_snapshot();

    // Installed mid-session: the queue drains at the next hook
    control.set_breakpoint("snap.lua", 2);

    let controller = thread::spawn(move || {
        let stop = control.wait_stop();
        control.resume();
        stop
    });

    let results = vm.call(func, vec![]).unwrap();
    assert_eq!(results[0].as_number(), Some(3.0));
    assert!(controller.join().unwrap().is_some());

    // The trap is still physically installed...
    assert_ne!(proto.code_snapshot(), pristine);
    // ...but a user-visible dump normalizes back to the original
    assert_eq!(debugger.normalized_code(&proto), pristine);
}

#[test]
fn test_step_over_stops_on_next_line() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    control.set_breakpoint("step.lua", 2);
    let func = vm
        .load_string(
            "local a = 1\nlocal b = 2\nlocal c = a + b\nreturn c",
            "@step.lua",
        )
        .unwrap();

    let controller = thread::spawn(move || {
        let first = control.wait_stop().expect("breakpoint stop");
        control.step_over();
        let second = control.wait_stop().expect("step stop");
        control.resume();
        (first, second)
    });

    let results = vm.call(func, vec![]).unwrap();
    let (first, second) = controller.join().unwrap();

    assert_eq!(results[0].as_number(), Some(3.0));
    assert_eq!(first.line, 2);
    assert_eq!(first.reason, StopReason::Breakpoint);
    assert_eq!(second.line, 3);
    assert_eq!(second.reason, StopReason::Step);
    assert_eq!(debugger.stop_count(), 2);
}

#[test]
fn test_step_in_enters_callee() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    control.set_breakpoint("stepin.lua", 4);
    let func = vm
        .load_string(
            "local function f()\n  return 7\nend\nlocal x = f()\nreturn x",
            "@stepin.lua",
        )
        .unwrap();

    let controller = thread::spawn(move || {
        let first = control.wait_stop().expect("breakpoint stop");
        control.step_in();
        let second = control.wait_stop().expect("step-in stop");
        control.resume();
        (first, second)
    });

    let results = vm.call(func, vec![]).unwrap();
    let (first, second) = controller.join().unwrap();

    assert_eq!(results[0].as_number(), Some(7.0));
    assert_eq!(first.line, 4);
    // Stopped inside f's body
    assert_eq!(second.line, 2, "second stop: {:?}", second);
    assert_eq!(second.reason, StopReason::Step);
}

#[test]
fn test_step_out_returns_to_caller() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    control.set_breakpoint("stepout.lua", 2);
    let func = vm
        .load_string(
            "local function f()\n  local inner = 7\n  return inner\nend\nlocal x = f()\nreturn x + 1",
            "@stepout.lua",
        )
        .unwrap();

    let controller = thread::spawn(move || {
        let first = control.wait_stop().expect("breakpoint stop");
        control.step_out();
        let second = control.wait_stop().expect("step-out stop");
        control.resume();
        (first, second)
    });

    let results = vm.call(func, vec![]).unwrap();
    let (first, second) = controller.join().unwrap();

    assert_eq!(results[0].as_number(), Some(8.0));
    assert_eq!(first.line, 2);
    // Back in the caller, at the line holding the in-flight call
    assert_eq!(second.line, 5, "second stop: {:?}", second);
    assert_eq!(second.reason, StopReason::Step);
}

#[test]
fn test_clear_breakpoint_stops_firing() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let (debugger, control) = VmDebugger::new();
    vm.set_debugger(debugger.clone());

    control.set_breakpoint("loop.lua", 2);
    let func = vm
        .load_string(
            "for i = 1, 3 do\n  local v = i\nend\nreturn 0",
            "@loop.lua",
        )
        .unwrap();

    let controller = thread::spawn(move || {
        // First iteration hits; clearing prevents the remaining two
        let first = control.wait_stop().expect("first hit");
        control.clear_breakpoint("loop.lua", 2);
        control.resume();
        first
    });

    let results = vm.call(func, vec![]).unwrap();
    let first = controller.join().unwrap();

    assert_eq!(results[0].as_number(), Some(0.0));
    assert_eq!(first.line, 2);
    assert_eq!(debugger.stop_count(), 1);
}
