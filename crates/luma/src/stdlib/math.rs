// Math library over IEEE doubles; math.random uses the VM's seeded rng.

use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaContext, LuaResult, LuaVM};
use rand::{Rng, SeedableRng};

pub fn create_math_lib() -> LibraryModule {
    let mut module = crate::lib_module!("math", {
        "abs" => math_abs,
        "ceil" => math_ceil,
        "floor" => math_floor,
        "sqrt" => math_sqrt,
        "sin" => math_sin,
        "cos" => math_cos,
        "tan" => math_tan,
        "exp" => math_exp,
        "log" => math_log,
        "pow" => math_pow,
        "fmod" => math_fmod,
        "modf" => math_modf,
        "max" => math_max,
        "min" => math_min,
        "random" => math_random,
        "randomseed" => math_randomseed,
    });
    module = module.with_value("pi", |_vm: &mut LuaVM| LuaValue::Number(std::f64::consts::PI));
    module = module.with_value("huge", |_vm: &mut LuaVM| LuaValue::Number(f64::INFINITY));
    module
}

macro_rules! unary_math {
    ($name:ident, $op:expr) => {
        fn $name(ctx: &mut LuaContext) -> LuaResult<usize> {
            let n = ctx.check_number(1)?;
            let f: fn(f64) -> f64 = $op;
            ctx.push(LuaValue::Number(f(n)));
            Ok(1)
        }
    };
}

unary_math!(math_abs, f64::abs);
unary_math!(math_ceil, f64::ceil);
unary_math!(math_floor, f64::floor);
unary_math!(math_sqrt, f64::sqrt);
unary_math!(math_sin, f64::sin);
unary_math!(math_cos, f64::cos);
unary_math!(math_tan, f64::tan);
unary_math!(math_exp, f64::exp);

fn math_log(ctx: &mut LuaContext) -> LuaResult<usize> {
    let n = ctx.check_number(1)?;
    let result = match ctx.arg(2) {
        LuaValue::Nil => n.ln(),
        _ => n.log(ctx.check_number(2)?),
    };
    ctx.push(LuaValue::Number(result));
    Ok(1)
}

fn math_pow(ctx: &mut LuaContext) -> LuaResult<usize> {
    let x = ctx.check_number(1)?;
    let y = ctx.check_number(2)?;
    ctx.push(LuaValue::Number(x.powf(y)));
    Ok(1)
}

fn math_fmod(ctx: &mut LuaContext) -> LuaResult<usize> {
    let x = ctx.check_number(1)?;
    let y = ctx.check_number(2)?;
    ctx.push(LuaValue::Number(x % y));
    Ok(1)
}

fn math_modf(ctx: &mut LuaContext) -> LuaResult<usize> {
    let n = ctx.check_number(1)?;
    ctx.push(LuaValue::Number(n.trunc()));
    ctx.push(LuaValue::Number(n.fract()));
    Ok(2)
}

fn math_max(ctx: &mut LuaContext) -> LuaResult<usize> {
    let mut best = ctx.check_number(1)?;
    for i in 2..=ctx.arg_count() {
        best = best.max(ctx.check_number(i)?);
    }
    ctx.push(LuaValue::Number(best));
    Ok(1)
}

fn math_min(ctx: &mut LuaContext) -> LuaResult<usize> {
    let mut best = ctx.check_number(1)?;
    for i in 2..=ctx.arg_count() {
        best = best.min(ctx.check_number(i)?);
    }
    ctx.push(LuaValue::Number(best));
    Ok(1)
}

fn math_random(ctx: &mut LuaContext) -> LuaResult<usize> {
    let result = match ctx.arg_count() {
        0 => ctx.vm().rng.gen_range(0.0..1.0),
        1 => {
            let m = ctx.check_integer(1)?;
            if m < 1 {
                return Err(ctx.bad_argument(1, "interval is empty"));
            }
            ctx.vm().rng.gen_range(1..=m) as f64
        }
        _ => {
            let m = ctx.check_integer(1)?;
            let n = ctx.check_integer(2)?;
            if m > n {
                return Err(ctx.bad_argument(2, "interval is empty"));
            }
            ctx.vm().rng.gen_range(m..=n) as f64
        }
    };
    ctx.push(LuaValue::Number(result));
    Ok(1)
}

fn math_randomseed(ctx: &mut LuaContext) -> LuaResult<usize> {
    let seed = ctx.check_number(1)?;
    ctx.vm().rng = rand::rngs::StdRng::seed_from_u64(seed.to_bits());
    Ok(0)
}
