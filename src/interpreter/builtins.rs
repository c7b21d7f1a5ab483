//! Built-in function implementations
//!
//! Builtins are dispatched by name from the expression evaluator, after
//! host-bound functions and before list constructors. The `LIST_*`
//! family wraps the ordinal algebra in [`super::lists`];
//! `SEED_RANDOM`/`RANDOM` drive the session RNG so runs stay
//! reproducible under an explicit seed.

use super::expressions::EvalCtx;
use super::lists;
use crate::state::value::{ListValue, Value};
use rand::{Rng, SeedableRng};

/// Dispatch a builtin by name. `None` means the name is not a builtin.
pub(crate) fn call(
    name: &str,
    args: &[Value],
    ctx: &mut EvalCtx,
) -> Option<Result<Value, String>> {
    let result = match name {
        "LIST_COUNT" => list_arg(name, args).map(|l| Value::Number(l.count() as f64)),
        "LIST_MIN" => list_arg(name, args).map(|l| Value::List(lists::min_item(&l, ctx.story))),
        "LIST_MAX" => list_arg(name, args).map(|l| Value::List(lists::max_item(&l, ctx.story))),
        "LIST_ALL" => list_arg(name, args).map(|l| Value::List(lists::all_items(&l, ctx.story))),
        "LIST_INVERT" => list_arg(name, args).map(|l| Value::List(lists::invert(&l, ctx.story))),
        "LIST_VALUE" => list_arg(name, args).and_then(|l| {
            lists::value_of(&l, ctx.story)
                .map(|ord| Value::Number(ord as f64))
                .ok_or_else(|| "LIST_VALUE needs a single-item list".to_string())
        }),
        "LIST_RANDOM" => list_arg(name, args).map(|l| {
            let items: Vec<(&str, &str)> = l.items().collect();
            if items.is_empty() {
                Value::List(ListValue::new())
            } else {
                let (list, item) = items[ctx.rng.gen_range(0..items.len())];
                Value::List(ListValue::single(list, item))
            }
        }),
        "LIST_RANGE" => list_range(args, ctx),
        "SEED_RANDOM" => seed_random(args, ctx),
        "RANDOM" => random(args, ctx),
        _ => return None,
    };
    Some(result)
}

fn list_arg(name: &str, args: &[Value]) -> Result<ListValue, String> {
    match args {
        [Value::List(l)] => Ok(l.clone()),
        [other] => Err(format!("{name} needs a list, got {}", other.type_name())),
        _ => Err(format!("{name} takes exactly one argument")),
    }
}

/// `LIST_RANGE(list, min, max)` — bounds are ordinals or single items.
fn list_range(args: &[Value], ctx: &mut EvalCtx) -> Result<Value, String> {
    let [list, lo, hi] = args else {
        return Err("LIST_RANGE takes (list, min, max)".to_string());
    };
    let Value::List(list) = list else {
        return Err(format!("LIST_RANGE needs a list, got {}", list.type_name()));
    };
    let lo = range_bound(lo, ctx)?;
    let hi = range_bound(hi, ctx)?;
    Ok(Value::List(lists::range(list, lo, hi, ctx.story)))
}

fn range_bound(v: &Value, ctx: &EvalCtx) -> Result<usize, String> {
    if let Some(n) = v.as_number() {
        return Ok(n.max(0.0) as usize);
    }
    if let Value::List(l) = v {
        if let Some(ord) = lists::value_of(l, ctx.story) {
            return Ok(ord);
        }
    }
    Err(format!(
        "range bound must be a number or single item, got {}",
        v.type_name()
    ))
}

fn seed_random(args: &[Value], ctx: &mut EvalCtx) -> Result<Value, String> {
    let [seed] = args else {
        return Err("SEED_RANDOM takes one number".to_string());
    };
    let n = seed
        .as_number()
        .ok_or_else(|| format!("SEED_RANDOM needs a number, got {}", seed.type_name()))?;
    *ctx.rng = rand::rngs::SmallRng::seed_from_u64(n as u64);
    Ok(Value::Nil)
}

/// `RANDOM(min, max)` — uniform integer, both bounds inclusive.
fn random(args: &[Value], ctx: &mut EvalCtx) -> Result<Value, String> {
    let [lo, hi] = args else {
        return Err("RANDOM takes (min, max)".to_string());
    };
    let (Some(lo), Some(hi)) = (lo.as_number(), hi.as_number()) else {
        return Err("RANDOM needs numeric bounds".to_string());
    };
    let (lo, hi) = ((lo as i64).min(hi as i64), (lo as i64).max(hi as i64));
    Ok(Value::Number(ctx.rng.gen_range(lo..=hi) as f64))
}
