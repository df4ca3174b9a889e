// Arithmetic, control flow and scoping basics
use crate::*;

fn run_ok(source: &str) {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let result = vm.execute(source);
    if let Err(e) = &result {
        eprintln!("Error: {}", e);
        if let Some(tb) = e.traceback() {
            eprintln!("{}", tb);
        }
    }
    assert!(result.is_ok());
}

#[test]
fn test_arithmetic() {
    run_ok(
        r#"
        assert(1 + 2 == 3)
        assert(10 - 4 == 6)
        assert(6 * 7 == 42)
        assert(7 / 2 == 3.5)
        assert(7 % 3 == 1)
        assert(-7 % 3 == 2)
        assert(2 ^ 10 == 1024)
        assert(7 // 2 == 3)
        assert(-1 ^ 2 == -1)  -- unary minus binds looser than ^
    "#,
    );
}

#[test]
fn test_compile_execute_stringify() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let results = vm.execute("return 1+2").unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].display(), "3");
}

#[test]
fn test_string_coercion_in_arithmetic() {
    run_ok(
        r#"
        assert("10" + 5 == 15)
        assert("0x10" + 0 == 16)
        assert(10 .. "" == "10")
    "#,
    );
}

#[test]
fn test_comparison_no_coercion() {
    run_ok(
        r#"
        local ok = pcall(function() return 1 < "2" end)
        assert(ok == false)
        assert((1 == "1") == false)
    "#,
    );
}

#[test]
fn test_if_elseif_else() {
    run_ok(
        r#"
        local function classify(n)
            if n < 0 then return "neg"
            elseif n == 0 then return "zero"
            else return "pos" end
        end
        assert(classify(-5) == "neg")
        assert(classify(0) == "zero")
        assert(classify(9) == "pos")
    "#,
    );
}

#[test]
fn test_while_and_repeat() {
    run_ok(
        r#"
        local n, sum = 1, 0
        while n <= 10 do sum = sum + n; n = n + 1 end
        assert(sum == 55)

        local count = 0
        repeat count = count + 1 until count >= 3
        assert(count == 3)
    "#,
    );
}

#[test]
fn test_numeric_for() {
    run_ok(
        r#"
        local sum = 0
        for i = 1, 10 do sum = sum + i end
        assert(sum == 55)

        local down = {}
        for i = 5, 1, -2 do down[#down + 1] = i end
        assert(#down == 3 and down[1] == 5 and down[2] == 3 and down[3] == 1)

        local never = true
        for i = 1, 0 do never = false end
        assert(never)
    "#,
    );
}

#[test]
fn test_break() {
    run_ok(
        r#"
        local found
        for i = 1, 100 do
            if i * i > 50 then found = i break end
        end
        assert(found == 8)
    "#,
    );
}

#[test]
fn test_and_or_values() {
    run_ok(
        r#"
        assert((nil or 5) == 5)
        assert((false and 5) == false)
        assert((1 and 2) == 2)
        assert((nil and 2) == nil)
        local t = nil
        local v = t and t.field
        assert(v == nil)
    "#,
    );
}

#[test]
fn test_local_scoping() {
    run_ok(
        r#"
        local x = 1
        do
            local x = 2
            assert(x == 2)
        end
        assert(x == 1)
        local y = y  -- rhs sees the enclosing (global, nil) y
        assert(y == nil)
    "#,
    );
}

#[test]
fn test_multiple_assignment() {
    run_ok(
        r#"
        local a, b, c = 1, 2
        assert(a == 1 and b == 2 and c == nil)
        a, b = b, a
        assert(a == 2 and b == 1)
    "#,
    );
}

#[test]
fn test_globals_via_env() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.execute("g = 41").unwrap();
    let g = vm.get_global("g");
    assert_eq!(g.as_number(), Some(41.0));
    vm.set_global("h", LuaValue::Number(1.0));
    let r = vm.execute("return g + h").unwrap();
    assert_eq!(r[0].as_number(), Some(42.0));
}

#[test]
fn test_long_string_and_comments() {
    run_ok(
        r#"
        --[[ a long
             comment ]]
        local s = [[line1
line2]]
        assert(#s == 11)
    "#,
    );
}

#[test]
fn test_chunk_name_conventions() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let err = vm
        .load_string("return +", "@dir/file.lua")
        .map(|_| ())
        .unwrap_err();
    match err {
        LuaError::Compile(msg) => assert!(msg.starts_with("dir/file.lua:"), "got {}", msg),
        other => panic!("expected compile error, got {:?}", other),
    }
}
