// String library and pattern matching
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
fn test_len_sub() {
    run_ok(
        r#"
        assert(string.len("hello") == 5)
        assert(("hello"):sub(2, 4) == "ell")
        assert(("hello"):sub(-3) == "llo")
        assert(("hello"):sub(2) == "ello")
        assert(("hello"):sub(4, 2) == "")
        assert(("hello"):sub(-100, 100) == "hello")
    "#,
    );
}

#[test]
fn test_case_rep_reverse() {
    run_ok(
        r#"
        assert(("mid"):upper() == "MID")
        assert(("MID"):lower() == "mid")
        assert(("ab"):rep(3) == "ababab")
        assert(("ab"):rep(3, "-") == "ab-ab-ab")
        assert(("ab"):rep(0) == "")
        assert(("abc"):reverse() == "cba")
    "#,
    );
}

#[test]
fn test_byte_char() {
    run_ok(
        r#"
        assert(("A"):byte() == 65)
        local a, b = ("AB"):byte(1, 2)
        assert(a == 65 and b == 66)
        assert(string.char(104, 105) == "hi")
    "#,
    );
}

#[test]
fn test_format() {
    run_ok(
        r#"
        assert(string.format("%d items", 3) == "3 items")
        assert(string.format("%5d", 42) == "   42")
        assert(string.format("%-5d|", 42) == "42   |")
        assert(string.format("%05d", 42) == "00042")
        assert(string.format("%x", 255) == "ff")
        assert(string.format("%X", 255) == "FF")
        assert(string.format("%s=%s", "k", "v") == "k=v")
        assert(string.format("%.2f", 3.14159) == "3.14")
        assert(string.format("%%") == "%")
        assert(string.format("%q", 'he said "hi"') == '"he said \"hi\""')
        assert(string.format("%c", 65) == "A")
    "#,
    );
}

#[test]
fn test_find() {
    run_ok(
        r#"
        local s, e = ("hello world"):find("world")
        assert(s == 7 and e == 11)
        assert(("hello"):find("xyz") == nil)
        -- plain find ignores pattern magic
        local ps, pe = ("a.b"):find(".", 1, true)
        assert(ps == 2 and pe == 2)
        -- init offset
        local s2 = ("abcabc"):find("abc", 2)
        assert(s2 == 4)
        -- captures come after the positions
        local cs, ce, cap = ("key=42"):find("(%a+)=")
        assert(cs == 1 and ce == 4 and cap == "key")
    "#,
    );
}

#[test]
fn test_match() {
    run_ok(
        r#"
        assert(("hello 42"):match("%d+") == "42")
        assert(("hello"):match("^h") == "h")
        assert(("hello"):match("^e") == nil)
        local k, v = ("key=value"):match("(%a+)=(%a+)")
        assert(k == "key" and v == "value")
        -- position capture
        local p = ("abc"):match("()b")
        assert(p == 2)
    "#,
    );
}

#[test]
fn test_gmatch() {
    run_ok(
        r#"
        local words = {}
        for w in ("the quick brown fox"):gmatch("%a+") do
            words[#words + 1] = w
        end
        assert(#words == 4 and words[2] == "quick" and words[4] == "fox")

        local pairs_found = {}
        for k, v in ("a=1,b=2"):gmatch("(%a+)=(%d+)") do
            pairs_found[k] = v
        end
        assert(pairs_found.a == "1" and pairs_found.b == "2")
    "#,
    );
}

#[test]
fn test_gsub() {
    run_ok(
        r#"
        local s, n = ("hello world"):gsub("o", "0")
        assert(s == "hell0 w0rld" and n == 2)
        local limited = ("aaa"):gsub("a", "b", 2)
        assert(limited == "bba")
        -- %1 refers to the first capture
        local swapped = ("ab cd"):gsub("(%a)(%a)", "%2%1")
        assert(swapped == "ba dc")
        -- function replacement
        local doubled = ("1 2 3"):gsub("%d", function(d) return d * 2 end)
        assert(doubled == "2 4 6")
        -- table replacement
        local mapped = ("x y"):gsub("%a", {x = "1"})
        assert(mapped == "1 y")
    "#,
    );
}

#[test]
fn test_pattern_classes() {
    run_ok(
        r#"
        assert(("  trim  "):match("^%s*(.-)%s*$") == "trim")
        assert(("CamelCase"):match("%u%l+") == "Camel")
        assert(("a1b2"):gsub("%d", "") == "ab")
        assert(("[tag]"):match("%[(%a+)%]") == "tag")
        assert(("f(a(b)c)"):match("%b()") == "(a(b)c)")
    "#,
    );
}

#[test]
fn test_tostring_numbers() {
    run_ok(
        r#"
        assert(tostring(3) == "3")
        assert(tostring(3.5) == "3.5")
        assert(tostring(-0.5) == "-0.5")
        assert(tostring(1e15) == "1e15")
        assert(tostring(true) == "true")
        assert(tostring(nil) == "nil")
    "#,
    );
}

#[test]
fn test_tonumber() {
    run_ok(
        r#"
        assert(tonumber("42") == 42)
        assert(tonumber("  3.5  ") == 3.5)
        assert(tonumber("0x1F") == 31)
        assert(tonumber("zzz") == nil)
        assert(tonumber("ff", 16) == 255)
        assert(tonumber("10", 2) == 2)
    "#,
    );
}
