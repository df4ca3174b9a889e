// Stack and upvalue housekeeping observed from the host side
use crate::*;

#[test]
fn test_stack_balanced_after_calls() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.execute(
        r#"
        local function noisy(a, b)
            local t = {a, b}
            return t[1] + t[2]
        end
        local acc = 0
        for i = 1, 100 do acc = acc + noisy(i, i) end
        assert(acc == 10100)
    "#,
    )
    .unwrap();
    let t = vm.current_thread();
    let t = t.borrow();
    // The thread is idle: logical top reset, no frames, nothing open
    assert_eq!(t.top, 0);
    assert_eq!(t.frames.len(), 0);
    assert!(t.open_upvalues.is_empty());
}

#[test]
fn test_open_upvalues_within_frame_top() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("check_upvalues", |ctx| {
        let thread = ctx.thread();
        let t = thread.borrow();
        let top = t.top;
        for (slot, _) in &t.open_upvalues {
            assert!(*slot < top, "open upvalue at {} vs top {}", slot, top);
        }
        Ok(0)
    });
    vm.execute(
        r#"
        local x = 1
        local f = function() return x end
        check_upvalues()
        local y = 2
        local g = function() return x + y end
        check_upvalues()
        assert(g() == 3)
    "#,
    )
    .unwrap();
}

#[test]
fn test_upvalues_closed_after_error_unwind() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.execute(
        r#"
        captured = nil
        pcall(function()
            local v = "kept"
            captured = function() return v end
            error("unwind now")
        end)
        -- the error unwound the frame; the upvalue was closed over "kept"
        assert(captured() == "kept")
    "#,
    )
    .unwrap();
    let t = vm.current_thread();
    assert!(t.borrow().open_upvalues.is_empty());
}

#[test]
fn test_stack_overflow_reported() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let err = vm
        .execute(
            r#"
            local function grow(n)
                -- not a tail call: each level keeps its frame
                return 1 + grow(n + 1)
            end
            return grow(1)
        "#,
        )
        .unwrap_err();
    match err {
        LuaError::StackOverflow => {}
        LuaError::Runtime(e) => {
            let msg = e.value.display();
            assert!(msg.contains("stack overflow"), "got {}", msg);
        }
        other => panic!("expected stack overflow, got {:?}", other),
    }
    // The state is usable again afterwards
    let results = vm.execute("return 'still alive'").unwrap();
    assert_eq!(results[0].as_str(), Some("still alive"));
}

#[test]
fn test_frame_depth_constant_across_iterations() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("depth", |ctx| {
        let thread = ctx.thread();
        let depth = thread.borrow().frames.len();
        ctx.push(LuaValue::Number(depth as f64));
        Ok(1)
    });
    let results = vm
        .execute(
            r#"
            local first, last
            for i = 1, 50 do
                local d = depth()
                if i == 1 then first = d end
                last = d
            end
            return first, last
        "#,
        )
        .unwrap();
    assert_eq!(results[0].as_number(), results[1].as_number());
}
