//! Builtin natives

use super::arity;
use crate::interpreter::executor::errors::ExecError;
use crate::interpreter::executor::expressions::EvalContext;
use crate::interpreter::executor::types::Val;

pub fn len(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("len", &args, 1, 1)?;
    let n = match &args[0] {
        Val::Str(s) => s.chars().count(),
        Val::List(items) => items.len(),
        Val::Map(map) => map.len(),
        Val::Record(rec) => rec.fields.len(),
        Val::Handles(h) => h.len(),
        Val::Nil => 0,
        other => return Err(ExecError::eval(format!("len() of {}", other.kind()))),
    };
    Ok(Val::Int(n as i64))
}

/// `await(handles [, wait_all])`: collect finished async results as a map.
/// `handles` is either the handle map itself or the name of a variable holding it.
pub fn await_handles(_ns: &str, ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("await", &args, 1, 2)?;
    let wait_all = match args.get(1) {
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ExecError::eval("await() wait flag must be a boolean"))?,
        None => false,
    };
    let handles = match &args[0] {
        Val::Handles(h) => h.clone(),
        Val::Str(name) => match ctx.lookup(name) {
            Some(Val::Handles(h)) => h,
            _ => return Err(ExecError::eval(format!("'{}' does not hold async handles", name))),
        },
        other => {
            return Err(ExecError::eval(format!(
                "await() expects a handle map, found {}",
                other.kind()
            )))
        }
    };
    let results = ctx.interp.await_handles(&handles, wait_all);
    Ok(Val::Map(results))
}

/// Sorted keys of a map
pub fn keys(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("keys", &args, 1, 1)?;
    match &args[0] {
        Val::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Ok(Val::List(keys.into_iter().map(|k| Val::Str(k.clone())).collect()))
        }
        Val::Handles(h) => {
            let mut keys = h.keys();
            keys.sort();
            Ok(Val::List(keys.into_iter().map(Val::Str).collect()))
        }
        other => Err(ExecError::eval(format!("keys() of {}", other.kind()))),
    }
}

pub fn append(_ns: &str, _ctx: &mut EvalContext<'_>, mut args: Vec<Val>) -> Result<Val, ExecError> {
    if args.is_empty() {
        return Err(ExecError::eval("append() needs a list"));
    }
    let rest = args.split_off(1);
    match args.pop() {
        Some(Val::List(mut items)) => {
            items.extend(rest);
            Ok(Val::List(items))
        }
        Some(Val::Nil) => Ok(Val::List(rest)),
        Some(other) => Err(ExecError::eval(format!("append() to {}", other.kind()))),
        None => Err(ExecError::eval("append() needs a list")),
    }
}

pub fn string(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("string", &args, 1, 1)?;
    Ok(Val::Str(args[0].to_string()))
}

pub fn int(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("int", &args, 1, 1)?;
    match &args[0] {
        Val::Int(n) => Ok(Val::Int(*n)),
        Val::Uint(n) => i64::try_from(*n)
            .map(Val::Int)
            .map_err(|_| ExecError::eval("int() overflow")),
        Val::Float(f) => Ok(Val::Int(f.trunc() as i64)),
        Val::Bool(b) => Ok(Val::Int(i64::from(*b))),
        Val::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Val::Int)
            .map_err(|_| ExecError::eval(format!("int() cannot parse '{}'", s))),
        other => Err(ExecError::eval(format!("int() of {}", other.kind()))),
    }
}

pub fn float(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("float", &args, 1, 1)?;
    match &args[0] {
        Val::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Val::Float)
            .map_err(|_| ExecError::eval(format!("float() cannot parse '{}'", s))),
        v => v
            .as_float()
            .map(Val::Float)
            .ok_or_else(|| ExecError::eval(format!("float() of {}", v.kind()))),
    }
}

pub fn kind(_ns: &str, _ctx: &mut EvalContext<'_>, args: Vec<Val>) -> Result<Val, ExecError> {
    arity("kind", &args, 1, 1)?;
    let name = match &args[0] {
        Val::Record(rec) => rec.type_name.clone(),
        v => v.kind().name().to_string(),
    };
    Ok(Val::Str(name))
}
