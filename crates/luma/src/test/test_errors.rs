// Error raising, protected calls, tracebacks
use crate::*;

fn run_ok(source: &str) {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let result = vm.execute(source);
    if let Err(e) = &result {
        eprintln!("Error: {}", e);
    }
    assert!(result.is_ok());
}

#[test]
fn test_pcall_catches_error() {
    // S4: the message carries position info but still contains "boom"
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let results = vm
        .execute(
            r#"
            local ok, err = pcall(function() error("boom") end)
            return ok, err:match("boom") ~= nil
        "#,
        )
        .unwrap();
    assert!(!results[0].is_truthy());
    assert!(results[1].is_truthy());
}

#[test]
fn test_error_position_prefix() {
    run_ok(
        r#"
        local ok, err = pcall(function() error("kaput") end)
        assert(ok == false)
        -- "source:line: kaput"
        assert(err:match(":%d+: kaput") ~= nil)
    "#,
    );
}

#[test]
fn test_error_with_non_string_value() {
    run_ok(
        r#"
        local ok, err = pcall(function() error({code = 404}) end)
        assert(ok == false)
        assert(type(err) == "table" and err.code == 404)
    "#,
    );
}

#[test]
fn test_error_level_zero() {
    run_ok(
        r#"
        local ok, err = pcall(function() error("raw", 0) end)
        assert(err == "raw")
    "#,
    );
}

#[test]
fn test_pcall_success_passthrough() {
    run_ok(
        r#"
        local ok, a, b = pcall(function() return 1, 2 end)
        assert(ok == true and a == 1 and b == 2)
    "#,
    );
}

#[test]
fn test_pcall_runtime_errors() {
    run_ok(
        r#"
        local ok1, e1 = pcall(function() return nil + 1 end)
        assert(ok1 == false and e1:match("arithmetic") ~= nil)
        local ok2, e2 = pcall(function() local x = nil return x.y end)
        assert(ok2 == false and e2:match("index") ~= nil)
        local ok3, e3 = pcall(function() local f = 5 return f() end)
        assert(ok3 == false and e3:match("call") ~= nil)
    "#,
    );
}

#[test]
fn test_nested_pcall() {
    run_ok(
        r#"
        local ok_outer, v = pcall(function()
            local ok_inner, err = pcall(error, "inner")
            assert(ok_inner == false)
            return "survived"
        end)
        assert(ok_outer == true and v == "survived")
    "#,
    );
}

#[test]
fn test_xpcall_handler() {
    run_ok(
        r#"
        local seen
        local ok, result = xpcall(
            function() error("x-fail") end,
            function(err) seen = err return "handled" end
        )
        assert(ok == false)
        assert(result == "handled")
        assert(seen:match("x%-fail") ~= nil)
    "#,
    );
}

#[test]
fn test_assert_message() {
    run_ok(
        r#"
        local ok, err = pcall(function() assert(false, "custom") end)
        assert(ok == false and err == "custom")
        local ok2, err2 = pcall(function() assert(nil) end)
        assert(ok2 == false and err2:match("assertion failed!") ~= nil)
        -- assert passes its arguments through on success
        local a, b = assert(1, 2)
        assert(a == 1 and b == 2)
    "#,
    );
}

#[test]
fn test_load_compile_error_is_returned() {
    run_ok(
        r#"
        local f, err = load("this is not lua ((")
        assert(f == nil)
        assert(type(err) == "string")
        local g = load("return 40 + 2")
        assert(g() == 42)
    "#,
    );
}

#[test]
fn test_load_with_reader_function() {
    run_ok(
        r#"
        local parts = {"return ", "1 ", "+ 2"}
        local i = 0
        local f = load(function()
            i = i + 1
            return parts[i]
        end)
        assert(f() == 3)
    "#,
    );
}

#[test]
fn test_error_surface_to_host() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let err = vm.execute("error('unhandled')").unwrap_err();
    match &err {
        LuaError::Runtime(e) => {
            let msg = e.value.as_str().unwrap();
            assert!(msg.contains("unhandled"));
            let tb = e.traceback.as_deref().unwrap();
            assert!(tb.contains("stack traceback:"));
        }
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn test_traceback_mentions_main_chunk() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let err = vm
        .execute("local function f() error('deep') end f()")
        .unwrap_err();
    let tb = err.traceback().unwrap().to_string();
    assert!(tb.contains("in main chunk"), "got {}", tb);
}

#[test]
fn test_error_kind_tags() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let err = vm.execute("assert(false)").unwrap_err();
    match err {
        LuaError::Runtime(e) => assert_eq!(e.kind, ErrorKind::Assertion),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_cancellation() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("pull_the_plug", |ctx| {
        ctx.vm().cancel_token().cancel();
        Ok(0)
    });
    let err = vm
        .execute(
            r#"
            pull_the_plug()
            local function f() return 1 end
            return f()
        "#,
        )
        .unwrap_err();
    assert!(matches!(err, LuaError::Cancelled));
}

#[test]
fn test_pcall_cannot_swallow_cancellation() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("pull_the_plug", |ctx| {
        ctx.vm().cancel_token().cancel();
        Ok(0)
    });
    let err = vm
        .execute(
            r#"
            local ok = pcall(function()
                pull_the_plug()
                local function f() return 1 end
                return f()
            end)
            return "not reached"
        "#,
        )
        .unwrap_err();
    assert!(matches!(err, LuaError::Cancelled));
}
