// OS library subset: time, clock, date, getenv.

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaContext, LuaResult};
use chrono::{Datelike, Local, TimeZone, Timelike, Utc};

pub fn create_os_lib() -> LibraryModule {
    crate::lib_module!("os", {
        "time" => os_time,
        "clock" => os_clock,
        "date" => os_date,
        "getenv" => os_getenv,
    })
}

fn os_time(ctx: &mut LuaContext) -> LuaResult<usize> {
    match ctx.arg(1) {
        LuaValue::Nil => {
            ctx.push(LuaValue::Number(Utc::now().timestamp() as f64));
        }
        LuaValue::Table(t) => {
            let geti = |key: &str, default: Option<i64>| -> LuaResult<i64> {
                let k = LuaValue::String(key.into());
                let v = t.borrow().raw_get(&k);
                match v.coerce_number() {
                    Some(n) => Ok(n as i64),
                    None => default.ok_or_else(|| {
                        crate::lua_vm::LuaError::runtime(format!(
                            "field '{}' missing in date table",
                            key
                        ))
                    }),
                }
            };
            let year = geti("year", None)?;
            let month = geti("month", None)?;
            let day = geti("day", None)?;
            let hour = geti("hour", Some(12))?;
            let min = geti("min", Some(0))?;
            let sec = geti("sec", Some(0))?;
            let stamp = Local
                .with_ymd_and_hms(
                    year as i32,
                    month as u32,
                    day as u32,
                    hour as u32,
                    min as u32,
                    sec as u32,
                )
                .single()
                .map(|dt| dt.timestamp())
                .unwrap_or(0);
            ctx.push(LuaValue::Number(stamp as f64));
        }
        _ => return Err(ctx.bad_argument(1, "table")),
    }
    Ok(1)
}

/// CPU-ish time: seconds since the state was created.
fn os_clock(ctx: &mut LuaContext) -> LuaResult<usize> {
    let elapsed = ctx.vm_ref().start_time.elapsed().as_secs_f64();
    ctx.push(LuaValue::Number(elapsed));
    Ok(1)
}

fn os_date(ctx: &mut LuaContext) -> LuaResult<usize> {
    let format = ctx.opt_string(1, "%c")?;
    let when = match ctx.arg(2) {
        LuaValue::Nil => Utc::now().timestamp(),
        _ => ctx.check_number(2)? as i64,
    };
    let (format, utc) = match format.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (format.to_string(), false),
    };
    if format.starts_with("*t") {
        let dt = Local.timestamp_opt(when, 0).single().unwrap_or_else(|| {
            Local.timestamp_opt(0, 0).single().unwrap()
        });
        let t = ctx.vm().new_table_with(0, 8);
        if let Some(table) = t.as_table() {
            let mut table = table.borrow_mut();
            let mut set = |k: &str, v: f64| {
                let _ = table.raw_set(LuaValue::String(k.into()), LuaValue::Number(v));
            };
            set("year", dt.year() as f64);
            set("month", dt.month() as f64);
            set("day", dt.day() as f64);
            set("hour", dt.hour() as f64);
            set("min", dt.minute() as f64);
            set("sec", dt.second() as f64);
            set("wday", dt.weekday().number_from_sunday() as f64);
            set("yday", dt.ordinal() as f64);
        }
        ctx.push(t);
        return Ok(1);
    }
    let rendered = if utc {
        match Utc.timestamp_opt(when, 0).single() {
            Some(dt) => dt.format(&format).to_string(),
            None => String::new(),
        }
    } else {
        match Local.timestamp_opt(when, 0).single() {
            Some(dt) => dt.format(&format).to_string(),
            None => String::new(),
        }
    };
    let v = ctx.vm().new_string_owned(rendered);
    ctx.push(v);
    Ok(1)
}

fn os_getenv(ctx: &mut LuaContext) -> LuaResult<usize> {
    let name = ctx.check_string(1)?;
    match std::env::var(&*name) {
        Ok(value) => {
            let v = ctx.vm().new_string_owned(value);
            ctx.push(v);
        }
        Err(_) => ctx.push(LuaValue::Nil),
    }
    Ok(1)
}
