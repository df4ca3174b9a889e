// String library: slicing, case, formatting and pattern matching.

use crate::lib_registry::LibraryModule;
use crate::lua_pattern::{self, Capture, LuaPattern, MatchResult};
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaContext, LuaError, LuaResult};
use crate::stdlib::tostring_value;

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "len" => string_len,
        "sub" => string_sub,
        "upper" => string_upper,
        "lower" => string_lower,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "byte" => string_byte,
        "char" => string_char,
        "format" => string_format,
        "find" => string_find,
        "match" => string_match,
        "gmatch" => string_gmatch,
        "gsub" => string_gsub,
    })
}

/// Normalize a 1-based (possibly negative) string position.
fn posrelat(pos: i64, len: usize) -> i64 {
    if pos >= 0 { pos } else { len as i64 + pos + 1 }
}

fn string_len(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    ctx.push(LuaValue::Number(s.len() as f64));
    Ok(1)
}

fn string_sub(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let len = s.len();
    let mut i = posrelat(ctx.opt_integer(2, 1)?, len);
    let mut j = posrelat(ctx.opt_integer(3, -1)?, len);
    if i < 1 {
        i = 1;
    }
    if j > len as i64 {
        j = len as i64;
    }
    let out = if i > j {
        String::new()
    } else {
        String::from_utf8_lossy(&s.as_bytes()[(i - 1) as usize..j as usize]).into_owned()
    };
    let v = ctx.vm().new_string_owned(out);
    ctx.push(v);
    Ok(1)
}

fn string_upper(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let v = ctx.vm().new_string_owned(s.to_uppercase());
    ctx.push(v);
    Ok(1)
}

fn string_lower(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let v = ctx.vm().new_string_owned(s.to_lowercase());
    ctx.push(v);
    Ok(1)
}

fn string_rep(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let n = ctx.check_integer(2)?;
    let sep = ctx.opt_string(3, "")?;
    let out = if n <= 0 {
        String::new()
    } else if sep.is_empty() {
        s.repeat(n as usize)
    } else {
        let mut pieces = Vec::with_capacity(n as usize);
        for _ in 0..n {
            pieces.push(s.to_string());
        }
        pieces.join(&sep)
    };
    let v = ctx.vm().new_string_owned(out);
    ctx.push(v);
    Ok(1)
}

fn string_reverse(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    let v = ctx
        .vm()
        .new_string_owned(String::from_utf8_lossy(&bytes).into_owned());
    ctx.push(v);
    Ok(1)
}

fn string_byte(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let len = s.len();
    let i = posrelat(ctx.opt_integer(2, 1)?, len).max(1);
    let j = posrelat(ctx.opt_integer(3, i)?, len).min(len as i64);
    let mut count = 0;
    for k in i..=j {
        ctx.push(LuaValue::Number(s.as_bytes()[(k - 1) as usize] as f64));
        count += 1;
    }
    Ok(count)
}

fn string_char(ctx: &mut LuaContext) -> LuaResult<usize> {
    let mut bytes = Vec::with_capacity(ctx.arg_count());
    for i in 1..=ctx.arg_count() {
        let code = ctx.check_integer(i)?;
        if !(0..=255).contains(&code) {
            return Err(ctx.bad_argument(i, "value out of range"));
        }
        bytes.push(code as u8);
    }
    let v = ctx
        .vm()
        .new_string_owned(String::from_utf8_lossy(&bytes).into_owned());
    ctx.push(v);
    Ok(1)
}

// ===== string.format =====

fn pad(text: String, width: usize, left_align: bool, zero: bool) -> String {
    if text.len() >= width {
        return text;
    }
    let fill = width - text.len();
    if left_align {
        format!("{}{}", text, " ".repeat(fill))
    } else if zero {
        // The sign stays in front of zero padding
        if let Some(rest) = text.strip_prefix('-') {
            format!("-{}{}", "0".repeat(fill), rest)
        } else {
            format!("{}{}", "0".repeat(fill), text)
        }
    } else {
        format!("{}{}", " ".repeat(fill), text)
    }
}

fn quote_lua_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn string_format(ctx: &mut LuaContext) -> LuaResult<usize> {
    let fmt = ctx.check_string(1)?;
    let mut out = String::with_capacity(fmt.len());
    let bytes = fmt.as_bytes();
    let mut pos = 0;
    let mut arg_idx = 1;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c != b'%' {
            out.push(c as char);
            pos += 1;
            continue;
        }
        pos += 1;
        if pos >= bytes.len() {
            return Err(LuaError::runtime(
                "invalid format string to 'format'".to_string(),
            ));
        }
        if bytes[pos] == b'%' {
            out.push('%');
            pos += 1;
            continue;
        }
        // flags
        let mut left_align = false;
        let mut zero = false;
        while pos < bytes.len() {
            match bytes[pos] {
                b'-' => left_align = true,
                b'0' => zero = true,
                b'+' | b' ' | b'#' => {}
                _ => break,
            }
            pos += 1;
        }
        // width
        let mut width = 0usize;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            width = width * 10 + (bytes[pos] - b'0') as usize;
            pos += 1;
        }
        // precision
        let mut precision: Option<usize> = None;
        if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            let mut p = 0usize;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                p = p * 10 + (bytes[pos] - b'0') as usize;
                pos += 1;
            }
            precision = Some(p);
        }
        let Some(&spec) = bytes.get(pos) else {
            return Err(LuaError::runtime(
                "invalid format string to 'format'".to_string(),
            ));
        };
        pos += 1;
        arg_idx += 1;
        let piece = match spec {
            b'd' | b'i' => {
                let n = ctx.check_integer(arg_idx)?;
                pad(n.to_string(), width, left_align, zero)
            }
            b'u' => {
                let n = ctx.check_integer(arg_idx)? as u64;
                pad(n.to_string(), width, left_align, zero)
            }
            b'x' => {
                let n = ctx.check_integer(arg_idx)? as u64;
                pad(format!("{:x}", n), width, left_align, zero)
            }
            b'X' => {
                let n = ctx.check_integer(arg_idx)? as u64;
                pad(format!("{:X}", n), width, left_align, zero)
            }
            b'o' => {
                let n = ctx.check_integer(arg_idx)? as u64;
                pad(format!("{:o}", n), width, left_align, zero)
            }
            b'c' => {
                let n = ctx.check_integer(arg_idx)?;
                ((n as u8) as char).to_string()
            }
            b'f' | b'F' => {
                let n = ctx.check_number(arg_idx)?;
                pad(
                    format!("{:.*}", precision.unwrap_or(6), n),
                    width,
                    left_align,
                    zero,
                )
            }
            b'e' | b'E' => {
                let n = ctx.check_number(arg_idx)?;
                let s = format!("{:.*e}", precision.unwrap_or(6), n);
                let s = if spec == b'E' { s.to_uppercase() } else { s };
                pad(s, width, left_align, zero)
            }
            b'g' | b'G' => {
                let n = ctx.check_number(arg_idx)?;
                let s = crate::lua_value::number_to_string(n);
                let s = if spec == b'G' { s.to_uppercase() } else { s };
                pad(s, width, left_align, zero)
            }
            b's' => {
                let v = ctx.arg(arg_idx);
                let mut s = tostring_value(ctx.vm(), &v)?;
                if let Some(p) = precision {
                    s.truncate(p);
                }
                pad(s, width, left_align, false)
            }
            b'q' => {
                let s = ctx.check_string(arg_idx)?;
                quote_lua_string(&s)
            }
            other => {
                return Err(LuaError::runtime(format!(
                    "invalid option '%{}' to 'format'",
                    other as char
                )));
            }
        };
        out.push_str(&piece);
    }
    let v = ctx.vm().new_string_owned(out);
    ctx.push(v);
    Ok(1)
}

// ===== Pattern-driven functions =====

fn compile_pattern(ctx: &LuaContext, index: usize, pattern: &str) -> LuaResult<LuaPattern> {
    lua_pattern::parse(pattern.as_bytes()).map_err(|e| {
        let _ = index;
        LuaError::runtime(format!("{}{}", ctx.vm_ref().where_(), e))
    })
}

/// Push one capture (string slice or position number).
fn capture_value(ctx: &mut LuaContext, text: &str, cap: &Capture) -> LuaValue {
    if cap.position {
        LuaValue::Number((cap.start + 1) as f64)
    } else {
        let slice = String::from_utf8_lossy(&text.as_bytes()[cap.start..cap.end]).into_owned();
        ctx.vm().new_string_owned(slice)
    }
}

fn push_match_values(ctx: &mut LuaContext, text: &str, m: &MatchResult) -> usize {
    if m.captures.is_empty() {
        let whole =
            String::from_utf8_lossy(&text.as_bytes()[m.start..m.end]).into_owned();
        let v = ctx.vm().new_string_owned(whole);
        ctx.push(v);
        1
    } else {
        let caps = m.captures.clone();
        for cap in &caps {
            let v = capture_value(ctx, text, cap);
            ctx.push(v);
        }
        caps.len()
    }
}

fn string_find(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let pattern = ctx.check_string(2)?;
    let len = s.len();
    let init = posrelat(ctx.opt_integer(3, 1)?, len).max(1) as usize - 1;
    let plain = ctx.arg(4).is_truthy();
    if init > len {
        ctx.push(LuaValue::Nil);
        return Ok(1);
    }
    if plain {
        match s.as_bytes()[init..]
            .windows(pattern.len().max(1))
            .position(|w| w == pattern.as_bytes())
        {
            Some(offset) if !pattern.is_empty() => {
                let start = init + offset;
                ctx.push(LuaValue::Number((start + 1) as f64));
                ctx.push(LuaValue::Number((start + pattern.len()) as f64));
                return Ok(2);
            }
            _ if pattern.is_empty() => {
                ctx.push(LuaValue::Number((init + 1) as f64));
                ctx.push(LuaValue::Number(init as f64));
                return Ok(2);
            }
            _ => {
                ctx.push(LuaValue::Nil);
                return Ok(1);
            }
        }
    }
    let compiled = compile_pattern(ctx, 2, &pattern)?;
    match lua_pattern::find_match(&compiled, s.as_bytes(), init) {
        Some(m) => {
            ctx.push(LuaValue::Number((m.start + 1) as f64));
            ctx.push(LuaValue::Number(m.end as f64));
            let caps = m.captures.clone();
            let mut count = 2;
            for cap in &caps {
                let v = capture_value(ctx, &s, cap);
                ctx.push(v);
                count += 1;
            }
            Ok(count)
        }
        None => {
            ctx.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn string_match(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let pattern = ctx.check_string(2)?;
    let len = s.len();
    let init = posrelat(ctx.opt_integer(3, 1)?, len).max(1) as usize - 1;
    let compiled = compile_pattern(ctx, 2, &pattern)?;
    match lua_pattern::find_match(&compiled, s.as_bytes(), init.min(len)) {
        Some(m) => Ok(push_match_values(ctx, &s, &m)),
        None => {
            ctx.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

/// Stateful iterator behind gmatch; position lives in a table upvalue.
fn gmatch_iterator(ctx: &mut LuaContext) -> LuaResult<usize> {
    let text = match ctx.upvalue(0) {
        LuaValue::String(s) => s,
        _ => return Err(LuaError::runtime("corrupt gmatch state".to_string())),
    };
    let pattern_src = match ctx.upvalue(1) {
        LuaValue::String(s) => s,
        _ => return Err(LuaError::runtime("corrupt gmatch state".to_string())),
    };
    let state = match ctx.upvalue(2) {
        LuaValue::Table(t) => t,
        _ => return Err(LuaError::runtime("corrupt gmatch state".to_string())),
    };
    let pos = state.borrow().raw_geti(1).as_number().unwrap_or(0.0) as usize;
    if pos > text.len() {
        ctx.push(LuaValue::Nil);
        return Ok(1);
    }
    let compiled = compile_pattern(ctx, 2, &pattern_src)?;
    match lua_pattern::find_match(&compiled, text.as_bytes(), pos) {
        Some(m) => {
            // An empty match still advances to guarantee progress
            let next = if m.end > pos { m.end } else { pos + 1 };
            state.borrow_mut().raw_seti(1, LuaValue::Number(next as f64));
            Ok(push_match_values(ctx, &text, &m))
        }
        None => {
            state
                .borrow_mut()
                .raw_seti(1, LuaValue::Number((text.len() + 1) as f64));
            ctx.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn string_gmatch(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let pattern = ctx.check_string(2)?;
    // Validate the pattern now so errors point at gmatch
    compile_pattern(ctx, 2, &pattern)?;
    let state = ctx.vm().new_table_with(1, 0);
    if let Some(t) = state.as_table() {
        t.borrow_mut().raw_seti(1, LuaValue::Number(0.0));
    }
    let iter = LuaValue::host_function(crate::lua_value::HostFunction::closure(
        "gmatch_iterator",
        gmatch_iterator,
        vec![LuaValue::String(s), LuaValue::String(pattern), state],
    ));
    ctx.push(iter);
    Ok(1)
}

fn apply_replacement(
    ctx: &mut LuaContext,
    text: &str,
    m: &MatchResult,
    repl: &LuaValue,
    out: &mut String,
) -> LuaResult<()> {
    let whole = String::from_utf8_lossy(&text.as_bytes()[m.start..m.end]).into_owned();
    match repl {
        LuaValue::String(r) => {
            let bytes = r.as_bytes();
            let mut i = 0;
            while i < bytes.len() {
                let c = bytes[i];
                if c == b'%' && i + 1 < bytes.len() {
                    let d = bytes[i + 1];
                    i += 2;
                    match d {
                        b'0' => out.push_str(&whole),
                        b'1'..=b'9' => {
                            let n = (d - b'0') as usize;
                            if let Some(cap) = m.captures.get(n - 1) {
                                if cap.position {
                                    out.push_str(&(cap.start + 1).to_string());
                                } else {
                                    out.push_str(&String::from_utf8_lossy(
                                        &text.as_bytes()[cap.start..cap.end],
                                    ));
                                }
                            } else if n == 1 && m.captures.is_empty() {
                                out.push_str(&whole);
                            } else {
                                return Err(LuaError::runtime(format!(
                                    "invalid capture index %{} in replacement",
                                    n
                                )));
                            }
                        }
                        other => out.push(other as char),
                    }
                } else {
                    out.push(c as char);
                    i += 1;
                }
            }
        }
        LuaValue::Table(t) => {
            let key = if let Some(cap) = m.captures.first() {
                capture_value(ctx, text, cap)
            } else {
                ctx.vm().new_string_owned(whole.clone())
            };
            let v = t.borrow().raw_get(&key);
            if v.is_truthy() {
                out.push_str(&tostring_value(ctx.vm(), &v)?);
            } else {
                out.push_str(&whole);
            }
        }
        f @ LuaValue::Function(_) => {
            let mut args = Vec::new();
            if m.captures.is_empty() {
                args.push(ctx.vm().new_string_owned(whole.clone()));
            } else {
                let caps = m.captures.clone();
                for cap in &caps {
                    args.push(capture_value(ctx, text, cap));
                }
            }
            let results =
                crate::lua_vm::execute::call_function(ctx.vm(), f.clone(), args)?;
            match results.first() {
                None | Some(LuaValue::Nil) | Some(LuaValue::Boolean(false)) => {
                    out.push_str(&whole);
                }
                Some(v) => out.push_str(&tostring_value(ctx.vm(), v)?),
            }
        }
        _ => {
            return Err(ctx.bad_argument(3, "string/function/table"));
        }
    }
    Ok(())
}

fn string_gsub(ctx: &mut LuaContext) -> LuaResult<usize> {
    let s = ctx.check_string(1)?;
    let pattern = ctx.check_string(2)?;
    let repl = ctx.arg(3);
    let max = match ctx.arg(4) {
        LuaValue::Nil => i64::MAX,
        _ => ctx.check_integer(4)?,
    };
    let compiled = compile_pattern(ctx, 2, &pattern)?;

    let mut out = String::with_capacity(s.len());
    let mut pos = 0usize;
    let mut count: i64 = 0;
    let bytes = s.as_bytes();
    while pos <= bytes.len() && count < max {
        let Some(m) = lua_pattern::find_match(&compiled, bytes, pos) else {
            break;
        };
        out.push_str(&String::from_utf8_lossy(&bytes[pos..m.start]));
        apply_replacement(ctx, &s, &m, &repl, &mut out)?;
        count += 1;
        if m.end > m.start {
            pos = m.end;
        } else {
            // Empty match: copy one char to guarantee progress
            if m.end < bytes.len() {
                out.push(bytes[m.end] as char);
            }
            pos = m.end + 1;
        }
        if compiled.anchored {
            break;
        }
    }
    if pos < bytes.len() {
        out.push_str(&String::from_utf8_lossy(&bytes[pos..]));
    }
    let v = ctx.vm().new_string_owned(out);
    ctx.push(v);
    ctx.push(LuaValue::Number(count as f64));
    Ok(2)
}
