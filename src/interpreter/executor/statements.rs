//! Statement handlers
//!
//! `dispatch` looks at a phrase's leading token and runs the matching handler.
//! Handlers never move the program counter themselves; they return a `Step`
//! and the frame loop applies it.

use regex::Regex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::async_tasks::HandleMap;
use super::errors::{exit_codes, ExecError};
use super::exec_loop::{context, Step};
use super::expressions::{coerce, find_top_level, matching_close, split_top_level, Evaluation};
use super::globals::RecordType;
use super::lookahead::{endif_from_else, find_block_end, if_jumps, next_case_clause};
use super::spaces::{FunctionSpace, Parameter};
use super::types::{
    ensure_slot, BreakTarget, CaseFrame, Construct, ControlStacks, FieldDef, Kind, LoopFrame,
    LoopState, Phrase, Token, TokenKind, Val, Variable,
};
use super::vm::Interpreter;
use crate::config::AssertPolicy;

/* ===================== Frame ===================== */

/// An open TEST section
#[derive(Debug, Clone, PartialEq)]
pub struct TestSection {
    pub name: String,
    pub group: String,
    pub policy: AssertPolicy,
    /// Group matched the configured filter
    pub selected: bool,
}

/// Per-invocation state that is reset on tail-call re-entry
pub struct Frame<'a> {
    pub interp: &'a Arc<Interpreter>,
    pub space: &'a FunctionSpace,
    pub slot: u32,
    pub pc: usize,
    pub line: usize,
    pub stacks: ControlStacks,
    pub test: Option<TestSection>,
    /// Temporary file of the open WITH block; removed when dropped
    pub with_file: Option<NamedTempFile>,
}

impl<'a> Frame<'a> {
    pub fn new(
        interp: &'a Arc<Interpreter>,
        space: &'a FunctionSpace,
        slot: u32,
        max_loops: usize,
        max_cases: usize,
    ) -> Self {
        Self {
            interp,
            space,
            slot,
            pc: 0,
            line: 0,
            stacks: ControlStacks::new(max_loops, max_cases),
            test: None,
            with_file: None,
        }
    }

    fn phrases(&self) -> &'a [Phrase] {
        &self.space.phrases
    }

    fn eval(&self, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Evaluation, ExecError> {
        if tokens.is_empty() {
            return Err(ExecError::syntax("missing expression"));
        }
        let mut ctx = context(self.interp, vars, self.slot, self.space.id, self.line);
        self.interp.evaluator().evaluate(&mut ctx, tokens)
    }

    fn value(&self, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Val, ExecError> {
        self.eval(vars, tokens).map(|e| e.value)
    }

    fn condition(&self, vars: &mut Vec<Variable>, tokens: &[Token], what: &str) -> Result<bool, ExecError> {
        let v = self.value(vars, tokens)?;
        v.as_bool().ok_or_else(|| {
            ExecError::eval(format!("{} condition must be a boolean, found {}", what, v.kind()))
        })
    }

    fn integer(&self, vars: &mut Vec<Variable>, tokens: &[Token], what: &str) -> Result<i64, ExecError> {
        let v = self.value(vars, tokens)?;
        v.as_int()
            .ok_or_else(|| ExecError::eval(format!("{} must be an integer, found {}", what, v.kind())))
    }

    /// Evaluate a comma separated list
    fn values(&self, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Vec<Val>, ExecError> {
        split_top_level(tokens)
            .into_iter()
            .map(|part| self.value(vars, part))
            .collect()
    }

    fn set_local(&self, vars: &mut Vec<Variable>, name: &str, value: Val) -> Result<(), ExecError> {
        let mut ctx = context(self.interp, vars, self.slot, self.space.id, self.line);
        ctx.assign(name, value)
    }

    /// Write through a binding slot recorded in a loop frame
    fn store_slot(&self, vars: &mut Vec<Variable>, slot: usize, value: Val) -> Result<(), ExecError> {
        ensure_slot(vars, slot);
        if vars[slot].name.is_empty() {
            vars[slot].name = self
                .interp
                .bindings
                .name_of(self.space.id, slot)
                .unwrap_or_default();
        }
        vars[slot].assign(value).map_err(ExecError::Eval)
    }
}

fn identifier<'t>(tokens: &'t [Token], at: usize, what: &str) -> Result<&'t str, ExecError> {
    match tokens.get(at) {
        Some(t) if t.kind == TokenKind::Identifier => Ok(&t.text),
        _ => Err(ExecError::syntax(format!("{} needs a name", what))),
    }
}

fn expect(tokens: &[Token], at: usize, kind: TokenKind, message: &str) -> Result<(), ExecError> {
    match tokens.get(at) {
        Some(t) if t.kind == kind => Ok(()),
        _ => Err(ExecError::syntax(message)),
    }
}

/* ===================== Dispatch ===================== */

pub fn dispatch(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, phrase: &Phrase) -> Result<Step, ExecError> {
    let Some(lead) = phrase.leading() else {
        return Ok(Step::Continue);
    };
    frame.line = phrase.line;
    let tokens = &phrase.tokens;

    match lead {
        TokenKind::Var => execute_var(frame, vars, tokens),
        TokenKind::Setglob => execute_setglob(frame, vars, tokens),
        TokenKind::Unset => execute_unset(frame, vars, tokens),

        TokenKind::While => execute_while(frame, vars, tokens),
        TokenKind::Endwhile => execute_endwhile(frame, vars),
        TokenKind::For => execute_for(frame, vars, tokens),
        TokenKind::Foreach => execute_foreach(frame, vars, tokens),
        TokenKind::Endfor => execute_endfor(frame, vars),
        TokenKind::Continue => execute_continue(frame),
        TokenKind::Break => execute_break(frame, vars, tokens),

        TokenKind::Case => execute_case(frame, vars, tokens),
        TokenKind::Is | TokenKind::Has | TokenKind::Contains | TokenKind::Or => {
            execute_clause(frame, vars, lead, tokens)
        }
        TokenKind::Endcase => match frame.stacks.pop_case() {
            Some(_) => Ok(Step::Continue),
            None => Err(ExecError::syntax("ENDCASE outside of a CASE block")),
        },

        TokenKind::If => execute_if(frame, vars, tokens),
        TokenKind::Else => Ok(Step::Jump(endif_from_else(frame.phrases(), frame.pc)? + 1)),
        TokenKind::Endif => Ok(Step::Continue),

        TokenKind::Define => execute_define(frame, vars, tokens),
        TokenKind::Return => execute_return(frame, vars, tokens),
        TokenKind::Async => execute_async(frame, vars, tokens),
        TokenKind::Enum => execute_enum(frame, vars, tokens),
        TokenKind::Struct => execute_struct(frame, vars, tokens),

        TokenKind::Print | TokenKind::Println => execute_print(frame, vars, lead, tokens),
        TokenKind::Assert => execute_assert(frame, vars, phrase),
        TokenKind::Exit => execute_exit(frame, vars, tokens),
        TokenKind::On => execute_on(frame, vars, phrase),
        TokenKind::Doc | TokenKind::Nop => Ok(Step::Continue),

        TokenKind::Test => execute_test(frame, vars, tokens),
        TokenKind::Endtest => {
            frame.test = None;
            Ok(Step::Continue)
        }
        TokenKind::With => execute_with(frame, vars, tokens),
        TokenKind::Endwith => execute_endwith(frame),
        TokenKind::Log => execute_log(frame, vars, tokens),

        TokenKind::Enddef => Err(ExecError::syntax("ENDDEF without DEFINE")),
        TokenKind::Endstruct => Err(ExecError::syntax("ENDSTRUCT without STRUCT")),
        TokenKind::Do | TokenKind::To | TokenKind::Step | TokenKind::In | TokenKind::As => Err(ExecError::syntax(
            format!("'{}' cannot start a statement", tokens[0].text),
        )),

        _ => execute_expression(frame, vars, tokens),
    }
}

/* ===================== Variables ===================== */

fn execute_var(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // VAR name kind [= expr]
    let name = identifier(tokens, 1, "VAR")?;
    let type_name = tokens
        .get(2)
        .map(|t| t.text.as_str())
        .ok_or_else(|| ExecError::syntax("VAR needs a type"))?;

    let (kind, type_override, zero) = match Kind::from_name(type_name) {
        Some(k) => (k, None, k.zero()),
        None => match frame.interp.definitions.record(type_name) {
            Some(ty) => (
                Kind::Record,
                Some(type_name.to_string()),
                Val::Record(ty.instantiate()),
            ),
            None => return Err(ExecError::syntax(format!("unknown type '{}'", type_name))),
        },
    };

    let initial = if tokens.len() > 3 {
        expect(tokens, 3, TokenKind::Assign, "expected '=' after VAR type")?;
        coerce(frame.value(vars, &tokens[4..])?, kind)?
    } else {
        zero.clone()
    };

    let mut ctx = context(frame.interp, vars, frame.slot, frame.space.id, frame.line);
    let var = ctx.variable_mut(name);
    var.kind = kind;
    var.declared = true;
    var.type_override = type_override;
    var.value = zero;
    var.assign(initial).map_err(ExecError::Eval)?;
    Ok(Step::Continue)
}

fn execute_setglob(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // SETGLOB name = expr
    let name = identifier(tokens, 1, "SETGLOB")?;
    expect(tokens, 2, TokenKind::Assign, "expected '=' in SETGLOB")?;
    let value = frame.value(vars, &tokens[3..])?;
    frame.interp.globals.set(name, value);
    Ok(Step::Continue)
}

fn execute_unset(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let name = identifier(tokens, 1, "UNSET")?;
    let ctx = context(frame.interp, vars, frame.slot, frame.space.id, frame.line);
    if let Some(slot) = ctx.local_slot(name) {
        vars[slot].clear();
        vars[slot].name.clear();
        return Ok(Step::Continue);
    }
    match frame.interp.globals.remove(name) {
        Some(_) => Ok(Step::Continue),
        None => Err(ExecError::eval(format!("'{}' is not defined", name))),
    }
}

/* ===================== Loops ===================== */

fn execute_while(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let end_at = find_block_end(frame.phrases(), frame.pc, TokenKind::Endwhile)?;
    let run = tokens.len() == 1 || frame.condition(vars, &tokens[1..], "WHILE")?;
    if !run {
        return Ok(Step::Jump(end_at + 1));
    }
    frame.stacks.push_loop(LoopFrame {
        construct: Construct::While,
        state: LoopState::Condition,
        header: frame.pc,
        end_at,
        var: None,
        key_var: None,
    })?;
    Ok(Step::Continue)
}

fn execute_endwhile(frame: &mut Frame<'_>, vars: &mut Vec<Variable>) -> Result<Step, ExecError> {
    let header = {
        let lp = frame.stacks.current_loop("ENDWHILE")?;
        if lp.construct != Construct::While {
            return Err(ExecError::syntax(format!("ENDWHILE closing a {}", lp.construct.name())));
        }
        lp.header
    };
    let cond_tokens = &frame.phrases()[header].tokens;
    let again = cond_tokens.len() == 1 || frame.condition(vars, &cond_tokens[1..], "WHILE")?;
    if again {
        return Ok(Step::Jump(header + 1));
    }
    frame.stacks.pop_loop();
    Ok(Step::Continue)
}

fn execute_for(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // FOR var = start TO end [STEP s]
    let name = identifier(tokens, 1, "FOR")?;
    expect(tokens, 2, TokenKind::Assign, "expected '=' in FOR")?;
    let rest = &tokens[3..];
    let to = find_top_level(rest, TokenKind::To)
        .ok_or_else(|| ExecError::syntax("FOR needs a TO clause"))?;
    let step_at = find_top_level(rest, TokenKind::Step);

    let start = frame.integer(vars, &rest[..to], "FOR start value")?;
    let end = frame.integer(vars, &rest[to + 1..step_at.unwrap_or(rest.len())], "FOR end value")?;
    let step = match step_at {
        Some(s) => frame.integer(vars, &rest[s + 1..], "FOR step")?,
        None => 1,
    };
    if step == 0 {
        return Err(ExecError::fatal(
            exit_codes::EVAL,
            "FOR loop with STEP 0 would never end",
        ));
    }

    let end_at = find_block_end(frame.phrases(), frame.pc, TokenKind::Endfor)?;
    let past_end = if step > 0 { start > end } else { start < end };
    if past_end {
        return Ok(Step::Jump(end_at + 1));
    }

    let var = frame.interp.bindings.resolve(frame.space.id, name);
    frame.store_slot(vars, var, Val::Int(start))?;
    frame.stacks.push_loop(LoopFrame {
        construct: Construct::For,
        state: LoopState::Counter {
            counter: start,
            end,
            step,
        },
        header: frame.pc,
        end_at,
        var: Some(var),
        key_var: None,
    })?;
    Ok(Step::Continue)
}

fn execute_foreach(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // FOREACH var IN expr
    let name = identifier(tokens, 1, "FOREACH")?;
    expect(tokens, 2, TokenKind::In, "expected IN in FOREACH")?;
    let container = frame.value(vars, &tokens[3..])?;
    let end_at = find_block_end(frame.phrases(), frame.pc, TokenKind::Endfor)?;

    let mut state = match container {
        Val::List(items) => LoopState::Sequence { items, index: 0 },
        Val::Str(s) => LoopState::Sequence {
            items: s.lines().map(Val::str).collect(),
            index: 0,
        },
        Val::Map(map) => LoopState::Entries {
            iter: map.into_iter(),
        },
        v @ (Val::Int(_) | Val::Uint(_) | Val::Float(_)) => LoopState::Sequence {
            items: vec![v],
            index: 0,
        },
        Val::Nil => LoopState::Sequence {
            items: Vec::new(),
            index: 0,
        },
        other => {
            return Err(ExecError::eval(format!("cannot iterate over {}", other.kind())))
        }
    };

    let first = match &mut state {
        LoopState::Sequence { items, .. } => items.first().cloned().map(|v| (Val::Int(0), v)),
        LoopState::Entries { iter } => iter.next().map(|(k, v)| (Val::Str(k), v)),
        _ => None,
    };
    let Some((key, value)) = first else {
        return Ok(Step::Jump(end_at + 1));
    };

    let bindings = &frame.interp.bindings;
    let var = bindings.resolve(frame.space.id, name);
    let key_var = bindings.resolve(frame.space.id, &format!("key_{}", name));
    frame.store_slot(vars, var, value)?;
    frame.store_slot(vars, key_var, key)?;
    frame.stacks.push_loop(LoopFrame {
        construct: Construct::Foreach,
        state,
        header: frame.pc,
        end_at,
        var: Some(var),
        key_var: Some(key_var),
    })?;
    Ok(Step::Continue)
}

fn execute_endfor(frame: &mut Frame<'_>, vars: &mut Vec<Variable>) -> Result<Step, ExecError> {
    let (header, var, key_var, next) = {
        let lp = frame.stacks.current_loop("ENDFOR")?;
        if lp.construct == Construct::While {
            return Err(ExecError::syntax("ENDFOR closing a WHILE"));
        }
        (lp.header, lp.var, lp.key_var, lp.advance())
    };
    match next {
        Some((key, value)) => {
            if let Some(slot) = var {
                frame.store_slot(vars, slot, value)?;
            }
            if let Some(slot) = key_var {
                frame.store_slot(vars, slot, key)?;
            }
            Ok(Step::Jump(header + 1))
        }
        None => {
            frame.stacks.pop_loop();
            Ok(Step::Continue)
        }
    }
}

fn execute_continue(frame: &mut Frame<'_>) -> Result<Step, ExecError> {
    match frame.stacks.innermost() {
        None => Err(ExecError::syntax("CONTINUE outside of a loop")),
        Some(Construct::Case) => Err(ExecError::syntax(
            "CONTINUE is not allowed directly inside a CASE block",
        )),
        Some(_) => {
            let lp = frame.stacks.current_loop("CONTINUE")?;
            Ok(Step::Jump(lp.end_at))
        }
    }
}

fn execute_break(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    if frame.stacks.depth() == 0 {
        return Err(ExecError::syntax("BREAK outside of a loop or CASE block"));
    }
    let named = match tokens.len() {
        2 => Construct::from_name(&tokens[1].text),
        _ => None,
    };
    let target = match (tokens.len(), named) {
        (1, _) => BreakTarget::Innermost,
        (_, Some(construct)) => BreakTarget::Construct(construct),
        _ => {
            let n = frame.integer(vars, &tokens[1..], "BREAK depth")?;
            if n < 1 {
                return Err(ExecError::syntax(format!("BREAK depth must be positive, found {}", n)));
            }
            BreakTarget::Count(n as usize)
        }
    };
    let count = frame.stacks.break_count(target)?;
    let end_at = frame.stacks.unwind(count)?;
    Ok(Step::Jump(end_at + 1))
}

/* ===================== CASE ===================== */

fn execute_case(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let end_at = find_block_end(frame.phrases(), frame.pc, TokenKind::Endcase)?;
    let value = if tokens.len() == 1 {
        Val::Bool(true)
    } else {
        frame.value(vars, &tokens[1..])?
    };
    frame.stacks.push_case(CaseFrame::new(end_at, value))?;
    Ok(Step::Continue)
}

fn execute_clause(
    frame: &mut Frame<'_>,
    vars: &mut Vec<Variable>,
    clause: TokenKind,
    tokens: &[Token],
) -> Result<Step, ExecError> {
    let label = tokens[0].text.to_uppercase();
    let (matched, end_at, value, default_ok) = {
        let cf = frame.stacks.current_case(&label)?;
        (cf.matched, cf.end_at, cf.value.clone(), cf.default_ok)
    };
    if matched {
        return Ok(Step::Jump(end_at));
    }

    let hit = match clause {
        TokenKind::Is => {
            let v = frame.value(vars, &tokens[1..])?;
            value.loose_eq(&v)
        }
        TokenKind::Has => frame.condition(vars, &tokens[1..], "HAS")?,
        TokenKind::Contains => {
            let pattern = match frame.value(vars, &tokens[1..])? {
                Val::Str(s) => s,
                other => {
                    return Err(ExecError::eval(format!(
                        "CONTAINS needs a pattern string, found {}",
                        other.kind()
                    )))
                }
            };
            let re = Regex::new(&pattern)
                .map_err(|e| ExecError::eval(format!("bad CONTAINS pattern: {}", e)))?;
            re.is_match(&value.to_string())
        }
        _ => default_ok,
    };

    if hit {
        frame.stacks.current_case(&label)?.mark_matched();
        return Ok(Step::Continue);
    }
    Ok(Step::Jump(
        next_case_clause(frame.phrases(), frame.pc).unwrap_or(end_at),
    ))
}

/* ===================== IF ===================== */

fn execute_if(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let jumps = if_jumps(frame.phrases(), frame.pc)?;
    if frame.condition(vars, &tokens[1..], "IF")? {
        return Ok(Step::Continue);
    }
    let distance = jumps.else_distance.unwrap_or(jumps.endif_distance);
    Ok(Step::Jump(frame.pc + distance + 1))
}

/* ===================== Functions ===================== */

fn execute_define(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // DEFINE name [( p1, p2 = default )]
    let name = identifier(tokens, 1, "DEFINE")?;
    let mut params = Vec::new();
    if tokens.len() > 2 {
        expect(tokens, 2, TokenKind::LParen, "expected '(' after function name")?;
        let close = matching_close(tokens, 2)
            .filter(|c| *c == tokens.len() - 1)
            .ok_or_else(|| ExecError::syntax("unbalanced parameter list"))?;
        for part in split_top_level(&tokens[3..close]) {
            if part.is_empty() {
                continue;
            }
            let pname = identifier(part, 0, "parameter")?;
            let default = if part.len() > 1 {
                expect(part, 1, TokenKind::Assign, "expected '=' before parameter default")?;
                Some(frame.value(vars, &part[2..])?)
            } else {
                None
            };
            params.push(Parameter {
                name: pname.to_string(),
                default,
            });
        }
    }

    let phrases = frame.phrases();
    let mut end = None;
    for (i, p) in phrases.iter().enumerate().skip(frame.pc + 1) {
        match p.leading() {
            Some(TokenKind::Define) => {
                return Err(ExecError::fatal(
                    exit_codes::SYNTAX,
                    "DEFINE cannot be nested inside another DEFINE",
                ))
            }
            Some(TokenKind::Enddef) => {
                end = Some(i);
                break;
            }
            _ => {}
        }
    }
    let end = end.ok_or_else(|| ExecError::syntax(format!("missing ENDDEF for {}", name)))?;

    let body = phrases[frame.pc + 1..end].to_vec();
    let id = frame.interp.define_space(name, body)?;
    frame.interp.spaces.set_params(id, params);
    Ok(Step::Jump(end + 1))
}

fn execute_return(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let rest = &tokens[1..];
    if rest.is_empty() {
        return Ok(Step::Return(Vec::new()));
    }

    let self_call = rest.len() >= 3
        && rest[0].kind == TokenKind::Identifier
        && rest[0].text == frame.space.name
        && rest[1].kind == TokenKind::LParen
        && matching_close(rest, 1) == Some(rest.len() - 1);
    if self_call {
        let args = frame.values(vars, &rest[2..rest.len() - 1])?;
        return Ok(Step::TailCall(args));
    }

    Ok(Step::Return(frame.values(vars, rest)?))
}

fn execute_async(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // ASYNC handles fn(args) [key]
    const USAGE: &str = "usage: ASYNC handle_map function(args) [key]";
    if tokens.len() < 5 {
        return Err(ExecError::syntax(USAGE));
    }
    let auto_close = tokens[1].kind == TokenKind::NilLiteral;
    if !auto_close && tokens[1].kind != TokenKind::Identifier {
        return Err(ExecError::syntax(USAGE));
    }
    let handles_name = tokens[1].text.as_str();
    let fname = identifier(tokens, 2, "ASYNC call")?;
    expect(tokens, 3, TokenKind::LParen, USAGE)?;
    let close = matching_close(tokens, 3).ok_or_else(|| ExecError::syntax(USAGE))?;

    let args = frame.values(vars, &tokens[4..close])?;
    let key = if close + 1 < tokens.len() {
        Some(frame.value(vars, &tokens[close + 1..])?.to_string())
    } else {
        None
    };

    let target = frame
        .interp
        .find_function(fname)
        .ok_or_else(|| ExecError::UnknownFunction(fname.to_string()))?;
    let spawned = frame
        .interp
        .spawn(frame.slot, target, auto_close, frame.line, args)?;
    if auto_close {
        return Ok(Step::Continue);
    }

    let key = key.unwrap_or_else(|| format!("async_{}", spawned.instance));
    let mut ctx = context(frame.interp, vars, frame.slot, frame.space.id, frame.line);
    let map = match ctx.lookup(handles_name) {
        Some(Val::Handles(h)) => h,
        _ => {
            let h = HandleMap::new();
            ctx.assign(handles_name, Val::Handles(h.clone()))?;
            h
        }
    };
    if let Some(handle) = spawned.into_handle() {
        map.insert(key, handle);
    }
    Ok(Step::Continue)
}

/* ===================== Definitions ===================== */

fn execute_enum(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // ENUM name ( a, b = 5, c )
    let name = identifier(tokens, 1, "ENUM")?;
    expect(tokens, 2, TokenKind::LParen, "expected '(' after ENUM name")?;
    let close = matching_close(tokens, 2)
        .filter(|c| *c == tokens.len() - 1)
        .ok_or_else(|| ExecError::syntax("unbalanced ENUM member list"))?;

    let mut members = HashMap::new();
    let mut counter: i64 = 0;
    for part in split_top_level(&tokens[3..close]) {
        if part.is_empty() {
            continue;
        }
        let member = identifier(part, 0, "ENUM member")?;
        if part.len() > 1 {
            expect(part, 1, TokenKind::Assign, "expected '=' in ENUM member")?;
            let v = frame.value(vars, &part[2..])?;
            if let Some(n) = v.as_int() {
                counter = n + 1;
            }
            members.insert(member.to_string(), v);
        } else {
            members.insert(member.to_string(), Val::Int(counter));
            counter += 1;
        }
    }
    frame.interp.definitions.define_enum(name, members);
    Ok(Step::Continue)
}

fn execute_struct(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // STRUCT name / field kind [= default] ... / ENDSTRUCT
    let name = identifier(tokens, 1, "STRUCT")?;
    let phrases = frame.phrases();
    let end = find_block_end(phrases, frame.pc, TokenKind::Endstruct)?;

    let mut fields = Vec::new();
    for p in &phrases[frame.pc + 1..end] {
        let ft = &p.tokens;
        let fname = identifier(ft, 0, "STRUCT field")?;
        let type_name = ft
            .get(1)
            .map(|t| t.text.as_str())
            .ok_or_else(|| ExecError::syntax(format!("field '{}' needs a type", fname)))?;
        let (kind, zero) = match Kind::from_name(type_name) {
            Some(k) => (k, k.zero()),
            None => match frame.interp.definitions.record(type_name) {
                Some(ty) => (Kind::Record, Val::Record(ty.instantiate())),
                None => return Err(ExecError::syntax(format!("unknown type '{}'", type_name))),
            },
        };
        let default = if ft.len() > 2 {
            expect(ft, 2, TokenKind::Assign, "expected '=' before field default")?;
            coerce(frame.value(vars, &ft[3..])?, kind)?
        } else {
            zero
        };
        fields.push(FieldDef {
            name: fname.to_string(),
            kind,
            default,
        });
    }

    frame.interp.definitions.define_record(RecordType {
        name: name.to_string(),
        fields,
    });
    Ok(Step::Jump(end + 1))
}

/* ===================== Output and Misc ===================== */

fn execute_print(
    frame: &mut Frame<'_>,
    vars: &mut Vec<Variable>,
    kind: TokenKind,
    tokens: &[Token],
) -> Result<Step, ExecError> {
    let mut text = String::new();
    for v in frame.values(vars, &tokens[1..])? {
        text.push_str(&v.to_string());
    }
    if kind == TokenKind::Println {
        text.push('\n');
    }
    frame.interp.write_output(&text)?;
    Ok(Step::Continue)
}

fn execute_assert(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, phrase: &Phrase) -> Result<Step, ExecError> {
    let cfg = frame.interp.config();
    if !cfg.test_mode {
        return Ok(Step::Continue);
    }
    let passed = frame.condition(vars, &phrase.tokens[1..], "ASSERT")?;

    let Some(section) = frame.test.as_ref().filter(|t| t.selected) else {
        if passed {
            return Ok(Step::Continue);
        }
        return Err(ExecError::Assertion(phrase.original.clone()));
    };

    frame.interp.tests.record(passed);
    if passed {
        info!(group = %section.group, test = %section.name, line = frame.line, "test passed");
        return Ok(Step::Continue);
    }
    match cfg.test_assert_override.unwrap_or(section.policy) {
        AssertPolicy::Fail => Err(ExecError::Assertion(phrase.original.clone())),
        AssertPolicy::Continue => {
            warn!(
                group = %section.group,
                test = %section.name,
                line = frame.line,
                "assertion failed, continuing: {}",
                phrase.original
            );
            Ok(Step::Continue)
        }
    }
}

fn execute_exit(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // EXIT [code [, message]]
    let parts = split_top_level(&tokens[1..]);
    let code = match parts.first() {
        Some(t) => frame.integer(vars, t, "EXIT status")?,
        None => 0,
    };
    if let Some(msg) = parts.get(1) {
        let text = frame.value(vars, msg)?;
        frame.interp.write_output(&format!("{}\n", text))?;
    }
    let code = i32::try_from(code).map_err(|_| ExecError::eval("EXIT status out of range"))?;
    Ok(Step::Exit(code))
}

fn execute_on(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, phrase: &Phrase) -> Result<Step, ExecError> {
    // ON cond DO statement
    let tokens = &phrase.tokens;
    let do_at = find_top_level(tokens, TokenKind::Do)
        .ok_or_else(|| ExecError::syntax("ON needs a DO clause"))?;
    let body = &tokens[do_at + 1..];
    let Some(first) = body.first() else {
        return Err(ExecError::syntax("ON .. DO needs a statement"));
    };
    if matches!(
        first.kind,
        TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::Foreach
            | TokenKind::Case
            | TokenKind::Define
            | TokenKind::Struct
            | TokenKind::On
    ) {
        return Err(ExecError::syntax("ON .. DO cannot open a block"));
    }
    if !frame.condition(vars, &tokens[1..do_at], "ON")? {
        return Ok(Step::Continue);
    }
    let deferred = Phrase::new(body.to_vec(), phrase.line, phrase.original.clone());
    dispatch(frame, vars, &deferred)
}

/* ===================== Test Sections ===================== */

fn section_label(token: &Token) -> String {
    match &token.literal {
        Some(Val::Str(s)) => s.clone(),
        _ => token.text.clone(),
    }
}

fn execute_test(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // TEST "name" GROUP "group" [ASSERT FAIL|CONTINUE]
    let cfg = frame.interp.config();
    if !cfg.test_mode {
        return Ok(Step::Continue);
    }
    if tokens.len() != 4 && tokens.len() != 6 {
        return Err(ExecError::syntax("usage: TEST name GROUP group [ASSERT FAIL|CONTINUE]"));
    }
    if !tokens[2].text.eq_ignore_ascii_case("group") {
        return Err(ExecError::syntax("TEST needs a GROUP"));
    }
    let policy = if tokens.len() == 6 {
        expect(tokens, 4, TokenKind::Assert, "TEST policy must follow ASSERT")?;
        match tokens[5].text.to_ascii_lowercase().as_str() {
            "fail" => AssertPolicy::Fail,
            "continue" => AssertPolicy::Continue,
            other => return Err(ExecError::syntax(format!("unknown TEST assert policy '{}'", other))),
        }
    } else {
        AssertPolicy::Fail
    };

    let name = section_label(&tokens[1]);
    let group = section_label(&tokens[3]);
    let filter = Regex::new(&cfg.test_group_filter)
        .map_err(|e| ExecError::eval(format!("bad test group filter: {}", e)))?;
    let selected = filter.is_match(&group);
    if selected {
        frame.set_local(vars, "_test_group", Val::str(group.as_str()))?;
        frame.set_local(vars, "_test_name", Val::str(name.as_str()))?;
        info!(group = %group, test = %name, "test section");
    }

    frame.test = Some(TestSection {
        name,
        group,
        policy,
        selected,
    });
    Ok(Step::Continue)
}

/* ===================== WITH Blocks ===================== */

fn execute_with(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    // WITH var AS name
    const USAGE: &str = "usage: WITH variable AS name";
    if tokens.len() != 4 {
        return Err(ExecError::syntax(USAGE));
    }
    identifier(tokens, 1, "WITH")?;
    expect(tokens, 2, TokenKind::As, USAGE)?;
    let target = identifier(tokens, 3, "WITH .. AS")?;
    if frame.with_file.is_some() {
        return Err(ExecError::syntax("WITH blocks cannot be nested"));
    }

    let content = match frame.value(vars, &tokens[1..2])? {
        Val::Str(s) => s,
        other => {
            return Err(ExecError::eval(format!(
                "WITH needs a string variable, found {}",
                other.kind()
            )))
        }
    };

    let mut file = tempfile::Builder::new()
        .prefix("za_with_")
        .tempfile()
        .map_err(|e| ExecError::fatal(exit_codes::FATAL, format!("WITH could not create a temporary file: {}", e)))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| ExecError::fatal(exit_codes::FATAL, format!("WITH could not write its temporary file: {}", e)))?;

    let path = file.path().to_string_lossy().into_owned();
    frame.set_local(vars, target, Val::Str(path))?;
    frame.with_file = Some(file);
    Ok(Step::Continue)
}

fn execute_endwith(frame: &mut Frame<'_>) -> Result<Step, ExecError> {
    let file = frame
        .with_file
        .take()
        .ok_or_else(|| ExecError::syntax("ENDWITH without WITH"))?;
    file.close().map_err(|e| {
        ExecError::fatal(exit_codes::FATAL, format!("WITH could not remove its temporary file: {}", e))
    })?;
    Ok(Step::Continue)
}

fn execute_log(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let mut text = String::new();
    if tokens.len() > 1 {
        for v in frame.values(vars, &tokens[1..])? {
            text.push_str(&v.to_string());
        }
    }
    info!(target: "za::log", function = %frame.space.name, line = frame.line, "{}", text);
    Ok(Step::Continue)
}

fn execute_expression(frame: &mut Frame<'_>, vars: &mut Vec<Variable>, tokens: &[Token]) -> Result<Step, ExecError> {
    let result = frame.eval(vars, tokens)?;
    if frame.interp.config().interactive && !result.assigned && !result.value.is_nil() {
        frame.interp.write_output(&format!("{}\n", result.value))?;
    }
    Ok(Step::Continue)
}
