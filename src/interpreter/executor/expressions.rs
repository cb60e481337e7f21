//! Expression evaluation
//!
//! The engine only ever hands a token slice to an `Evaluator` and gets back a
//! value plus whether an assignment happened. `ExprEvaluator` is the built-in
//! implementation: it parses the slice into a small tree with a Pratt parser,
//! then walks it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::ExecError;
use super::types::{ensure_slot, Kind, Record, Token, TokenKind, Val, Variable};
use super::vm::Interpreter;

/* ===================== Evaluator Seam ===================== */

/// Result of evaluating a token slice
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Val,
    pub assigned: bool,
}

pub trait Evaluator: Send + Sync {
    fn evaluate(&self, ctx: &mut EvalContext<'_>, tokens: &[Token]) -> Result<Evaluation, ExecError>;
}

/// What an evaluator may touch while reducing an expression
pub struct EvalContext<'a> {
    pub interp: &'a Arc<Interpreter>,
    pub vars: &'a mut Vec<Variable>,
    /// Call table slot of the running invocation
    pub slot: u32,
    /// Function space the invocation executes
    pub base: u32,
    pub line: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(interp: &'a Arc<Interpreter>, vars: &'a mut Vec<Variable>, slot: u32, base: u32) -> Self {
        Self {
            interp,
            vars,
            slot,
            base,
            line: 0,
        }
    }

    /// Name of the running function space
    pub fn namespace(&self) -> String {
        self.interp
            .spaces
            .get(self.base)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Slot of a local that has been assigned in this invocation
    pub fn local_slot(&self, name: &str) -> Option<usize> {
        let slot = self.interp.bindings.lookup(self.base, name)?;
        self.vars
            .get(slot)
            .filter(|v| !v.name.is_empty())
            .map(|_| slot)
    }

    /// Resolve an identifier: locals, then globals, then enum tables
    pub fn lookup(&self, name: &str) -> Option<Val> {
        if let Some(slot) = self.local_slot(name) {
            return Some(self.vars[slot].value.clone());
        }
        if let Some(v) = self.interp.globals.get(name) {
            return Some(v);
        }
        self.interp.definitions.enum_members(name).map(Val::Map)
    }

    /// Store into a local, binding it on first use
    pub fn assign(&mut self, name: &str, value: Val) -> Result<(), ExecError> {
        let slot = self.interp.bindings.resolve(self.base, name);
        ensure_slot(self.vars, slot);
        let var = &mut self.vars[slot];
        if var.name.is_empty() {
            var.name = name.to_string();
        }
        var.assign(value).map_err(ExecError::Eval)
    }

    /// Mutable access to a local variable slot, binding it if needed
    pub fn variable_mut(&mut self, name: &str) -> &mut Variable {
        let slot = self.interp.bindings.resolve(self.base, name);
        ensure_slot(self.vars, slot);
        let var = &mut self.vars[slot];
        if var.name.is_empty() {
            var.name = name.to_string();
        }
        var
    }

    /// Call a user function or native by name.
    /// Returns the call's value and, for method calls, the updated receiver.
    pub fn call(
        &mut self,
        name: &str,
        args: Vec<Val>,
        method: Option<Val>,
    ) -> Result<(Val, Option<Val>), ExecError> {
        if let Some(target) = self.interp.find_function(name) {
            return self.interp.call(self.slot, target, self.line, args, method);
        }
        if method.is_none() {
            if let Some(native) = self.interp.stdlib.get(name) {
                let ns = self.namespace();
                return native(&ns, self, args).map(|v| (v, None));
            }
        }
        Err(ExecError::UnknownFunction(name.to_string()))
    }
}

/* ===================== Expression Tree ===================== */

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Val),
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Call(String, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Unary(TokenKind, Box<Expr>),
    Binary(TokenKind, Box<Expr>, Box<Expr>),
    Assign(TokenKind, Box<Expr>, Box<Expr>),
}

/* ===================== Parser ===================== */

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

fn infix_power(kind: TokenKind) -> Option<u8> {
    let bp = match kind {
        TokenKind::LogicalOr => 1,
        TokenKind::LogicalAnd => 2,
        TokenKind::Eq | TokenKind::Ne => 3,
        TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => 4,
        TokenKind::Plus | TokenKind::Minus => 5,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => 6,
        _ => return None,
    };
    Some(bp)
}

const PREFIX_POWER: u8 = 7;

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<&'t Token, ExecError> {
        match self.next() {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(ExecError::syntax(format!("expected {} but found '{}'", what, t.text))),
            None => Err(ExecError::syntax(format!("expected {} at end of expression", what))),
        }
    }

    fn parse_all(mut self) -> Result<Expr, ExecError> {
        if self.tokens.is_empty() {
            return Err(ExecError::syntax("empty expression"));
        }
        let expr = self.assignment()?;
        if let Some(t) = self.peek() {
            return Err(ExecError::syntax(format!("unexpected '{}' in expression", t.text)));
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Expr, ExecError> {
        let lhs = self.binary(0)?;
        match self.peek_kind() {
            Some(op) if op == TokenKind::Assign || op.is_compound_assign() => {
                if !matches!(lhs, Expr::Ident(_) | Expr::Index(..) | Expr::Field(..)) {
                    return Err(ExecError::syntax("invalid assignment target"));
                }
                self.pos += 1;
                let rhs = self.assignment()?;
                Ok(Expr::Assign(op, Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn binary(&mut self, min_bp: u8) -> Result<Expr, ExecError> {
        let mut lhs = self.prefix()?;
        while let Some(op) = self.peek_kind() {
            let Some(bp) = infix_power(op) else { break };
            if bp <= min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExecError> {
        match self.peek_kind() {
            Some(op @ (TokenKind::Not | TokenKind::Minus)) => {
                self.pos += 1;
                let operand = self.binary(PREFIX_POWER)?;
                Ok(Expr::Unary(op, Box::new(operand)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ExecError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let idx = self.assignment()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let field = self.expect(TokenKind::Identifier, "field name")?;
                    if self.peek_kind() == Some(TokenKind::LParen) {
                        self.pos += 1;
                        let args = self.arguments()?;
                        expr = Expr::MethodCall(Box::new(expr), field.text.clone(), args);
                    } else {
                        expr = Expr::Field(Box::new(expr), field.text.clone());
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExecError> {
        let token = self
            .next()
            .ok_or_else(|| ExecError::syntax("unexpected end of expression"))?;
        match token.kind {
            TokenKind::NumericLiteral
            | TokenKind::StringLiteral
            | TokenKind::BoolLiteral
            | TokenKind::NilLiteral => Ok(Expr::Literal(token.literal.clone().unwrap_or_default())),
            TokenKind::Identifier => {
                if self.peek_kind() == Some(TokenKind::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    Ok(Expr::Call(token.text.clone(), args))
                } else {
                    Ok(Expr::Ident(token.text.clone()))
                }
            }
            TokenKind::LParen => {
                let inner = self.assignment()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let items = self.sequence(TokenKind::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => self.map_literal(),
            _ => Err(ExecError::syntax(format!("unexpected '{}' in expression", token.text))),
        }
    }

    /// Comma separated expressions up to `close`; the opener is already consumed
    fn sequence(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>, ExecError> {
        let mut items = Vec::new();
        if self.peek_kind() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.assignment()?);
            match self.next() {
                Some(t) if t.kind == TokenKind::Comma => continue,
                Some(t) if t.kind == close => return Ok(items),
                _ => return Err(ExecError::syntax(format!("expected ',' or {}", what))),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExecError> {
        self.sequence(TokenKind::RParen, "')'")
    }

    fn map_literal(&mut self) -> Result<Expr, ExecError> {
        let mut entries = Vec::new();
        if self.peek_kind() == Some(TokenKind::RBrace) {
            self.pos += 1;
            return Ok(Expr::Map(entries));
        }
        loop {
            let key = match self.next() {
                Some(t) if t.kind == TokenKind::Identifier => t.text.clone(),
                Some(t) if t.kind == TokenKind::StringLiteral => t.text.clone(),
                _ => return Err(ExecError::syntax("map keys must be names or strings")),
            };
            self.expect(TokenKind::Colon, "':'")?;
            let value = self.assignment()?;
            entries.push((key, value));
            match self.next() {
                Some(t) if t.kind == TokenKind::Comma => continue,
                Some(t) if t.kind == TokenKind::RBrace => return Ok(Expr::Map(entries)),
                _ => return Err(ExecError::syntax("expected ',' or '}' in map literal")),
            }
        }
    }
}

/* ===================== Token Helpers ===================== */

fn nesting_delta(kind: TokenKind) -> i32 {
    match kind {
        TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => 1,
        TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => -1,
        _ => 0,
    }
}

/// Split on commas that are not inside brackets
pub fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    if tokens.is_empty() {
        return parts;
    }
    let mut depth = 0;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        depth += nesting_delta(t.kind);
        if depth == 0 && t.kind == TokenKind::Comma {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Index of the bracket closing the one at `open`
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        depth += nesting_delta(t.kind);
        if depth == 0 {
            return Some(i);
        }
    }
    None
}

/// Position of the first `kind` token outside brackets
pub fn find_top_level(tokens: &[Token], kind: TokenKind) -> Option<usize> {
    let mut depth = 0;
    for (i, t) in tokens.iter().enumerate() {
        if depth == 0 && t.kind == kind {
            return Some(i);
        }
        depth += nesting_delta(t.kind);
    }
    None
}

/* ===================== Reference Evaluator ===================== */

#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, ctx: &mut EvalContext<'_>, tokens: &[Token]) -> Result<Evaluation, ExecError> {
        let expr = Parser::new(tokens).parse_all()?;
        let assigned = matches!(expr, Expr::Assign(..));
        let value = eval(ctx, &expr)?;
        Ok(Evaluation { value, assigned })
    }
}

fn eval(ctx: &mut EvalContext<'_>, expr: &Expr) -> Result<Val, ExecError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => ctx
            .lookup(name)
            .ok_or_else(|| ExecError::eval(format!("'{}' is not defined", name))),
        Expr::List(items) => items
            .iter()
            .map(|e| eval(ctx, e))
            .collect::<Result<Vec<_>, _>>()
            .map(Val::List),
        Expr::Map(entries) => {
            let mut map = HashMap::with_capacity(entries.len());
            for (k, e) in entries {
                map.insert(k.clone(), eval(ctx, e)?);
            }
            Ok(Val::Map(map))
        }
        Expr::Index(base, idx) => {
            let container = eval(ctx, base)?;
            let key = eval(ctx, idx)?;
            index(&container, &key)
        }
        Expr::Field(base, field) => {
            let container = eval(ctx, base)?;
            field_of(&container, field)
        }
        Expr::Call(name, args) => {
            let args = eval_args(ctx, args)?;
            if let Some(ty) = ctx.interp.definitions.record(name) {
                return construct(ty.instantiate(), args);
            }
            ctx.call(name, args, None).map(|(v, _)| v)
        }
        Expr::MethodCall(receiver, name, args) => {
            let target = eval(ctx, receiver)?;
            let args = eval_args(ctx, args)?;
            let (value, updated) = ctx.call(name, args, Some(target))?;
            if let Some(updated) = updated {
                if is_assignable(receiver) {
                    store(ctx, receiver, updated)?;
                }
            }
            Ok(value)
        }
        Expr::Unary(op, operand) => {
            let v = eval(ctx, operand)?;
            unary_op(*op, v)
        }
        Expr::Binary(TokenKind::LogicalAnd, l, r) => {
            if !truth(eval(ctx, l)?, "&&")? {
                return Ok(Val::Bool(false));
            }
            Ok(Val::Bool(truth(eval(ctx, r)?, "&&")?))
        }
        Expr::Binary(TokenKind::LogicalOr, l, r) => {
            if truth(eval(ctx, l)?, "||")? {
                return Ok(Val::Bool(true));
            }
            Ok(Val::Bool(truth(eval(ctx, r)?, "||")?))
        }
        Expr::Binary(op, l, r) => {
            let lv = eval(ctx, l)?;
            let rv = eval(ctx, r)?;
            binary_op(*op, lv, rv)
        }
        Expr::Assign(op, target, rhs) => {
            let mut value = eval(ctx, rhs)?;
            if *op != TokenKind::Assign {
                let current = eval(ctx, target)?;
                let arith = match op {
                    TokenKind::PlusAssign => TokenKind::Plus,
                    TokenKind::MinusAssign => TokenKind::Minus,
                    TokenKind::StarAssign => TokenKind::Star,
                    _ => TokenKind::Slash,
                };
                value = binary_op(arith, current, value)?;
            }
            store(ctx, target, value.clone())?;
            Ok(value)
        }
    }
}

fn eval_args(ctx: &mut EvalContext<'_>, args: &[Expr]) -> Result<Vec<Val>, ExecError> {
    args.iter().map(|a| eval(ctx, a)).collect()
}

fn is_assignable(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) => true,
        Expr::Index(base, _) | Expr::Field(base, _) => is_assignable(base),
        _ => false,
    }
}

/// Write `value` into an assignable expression, rebuilding containers outward
fn store(ctx: &mut EvalContext<'_>, target: &Expr, value: Val) -> Result<(), ExecError> {
    match target {
        Expr::Ident(name) => ctx.assign(name, value),
        Expr::Index(base, idx) => {
            let key = eval(ctx, idx)?;
            let mut container = eval(ctx, base)?;
            set_index(&mut container, &key, value)?;
            store(ctx, base, container)
        }
        Expr::Field(base, field) => {
            let mut container = eval(ctx, base)?;
            match &mut container {
                Val::Record(rec) => rec.set(field, value).map_err(ExecError::Eval)?,
                Val::Map(map) => {
                    map.insert(field.clone(), value);
                }
                other => {
                    return Err(ExecError::eval(format!(
                        "cannot set field '{}' on {}",
                        field,
                        other.kind()
                    )))
                }
            }
            store(ctx, base, container)
        }
        _ => Err(ExecError::syntax("invalid assignment target")),
    }
}

fn construct(mut record: Record, args: Vec<Val>) -> Result<Val, ExecError> {
    if args.len() > record.fields.len() {
        return Err(ExecError::eval(format!(
            "{} has {} fields, {} values given",
            record.type_name,
            record.fields.len(),
            args.len()
        )));
    }
    let names: Vec<String> = record.fields.iter().map(|f| f.name.clone()).collect();
    for (name, value) in names.iter().zip(args) {
        record.set(name, value).map_err(ExecError::Eval)?;
    }
    Ok(Val::Record(record))
}

/* ===================== Operations ===================== */

fn truth(v: Val, op: &str) -> Result<bool, ExecError> {
    v.as_bool()
        .ok_or_else(|| ExecError::eval(format!("'{}' needs booleans, found {}", op, v.kind())))
}

fn position(key: &Val, len: usize) -> Result<usize, ExecError> {
    let i = key
        .as_int()
        .ok_or_else(|| ExecError::eval(format!("index must be an integer, found {}", key.kind())))?;
    let resolved = if i < 0 { len as i64 + i } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(ExecError::eval(format!("index {} out of range (length {})", i, len)));
    }
    Ok(resolved as usize)
}

pub fn index(container: &Val, key: &Val) -> Result<Val, ExecError> {
    match container {
        Val::List(items) => Ok(items[position(key, items.len())?].clone()),
        Val::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Val::Str(chars[position(key, chars.len())?].to_string()))
        }
        Val::Map(map) => Ok(map.get(&key.to_string()).cloned().unwrap_or_default()),
        other => Err(ExecError::eval(format!("cannot index into {}", other.kind()))),
    }
}

fn set_index(container: &mut Val, key: &Val, value: Val) -> Result<(), ExecError> {
    match container {
        Val::List(items) => {
            let i = position(key, items.len())?;
            items[i] = value;
            Ok(())
        }
        Val::Map(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Val::Nil => {
            let mut map = HashMap::new();
            map.insert(key.to_string(), value);
            *container = Val::Map(map);
            Ok(())
        }
        other => Err(ExecError::eval(format!("cannot index into {}", other.kind()))),
    }
}

fn field_of(container: &Val, field: &str) -> Result<Val, ExecError> {
    match container {
        Val::Record(rec) => rec
            .get(field)
            .cloned()
            .ok_or_else(|| ExecError::eval(format!("{} has no field '{}'", rec.type_name, field))),
        Val::Map(map) => Ok(map.get(field).cloned().unwrap_or_default()),
        other => Err(ExecError::eval(format!("{} has no fields", other.kind()))),
    }
}

fn unary_op(op: TokenKind, v: Val) -> Result<Val, ExecError> {
    match (op, v) {
        (TokenKind::Not, Val::Bool(b)) => Ok(Val::Bool(!b)),
        (TokenKind::Minus, Val::Int(n)) => n
            .checked_neg()
            .map(Val::Int)
            .ok_or_else(|| ExecError::eval("integer overflow")),
        (TokenKind::Minus, Val::Uint(n)) => i64::try_from(n)
            .map(|n| Val::Int(-n))
            .map_err(|_| ExecError::eval("integer overflow")),
        (TokenKind::Minus, Val::Float(f)) => Ok(Val::Float(-f)),
        (op, v) => Err(ExecError::eval(format!(
            "operator {:?} cannot be applied to {}",
            op,
            v.kind()
        ))),
    }
}

fn int_pair(l: &Val, r: &Val) -> Option<(i64, i64)> {
    match (l, r) {
        (Val::Int(_) | Val::Uint(_), Val::Int(_) | Val::Uint(_)) => Some((l.as_int()?, r.as_int()?)),
        _ => None,
    }
}

fn int_arith(op: TokenKind, a: i64, b: i64) -> Result<Val, ExecError> {
    let out = match op {
        TokenKind::Plus => a.checked_add(b),
        TokenKind::Minus => a.checked_sub(b),
        TokenKind::Star => a.checked_mul(b),
        TokenKind::Slash | TokenKind::Percent if b == 0 => {
            return Err(ExecError::eval("division by zero"))
        }
        TokenKind::Slash => a.checked_div(b),
        TokenKind::Percent => a.checked_rem(b),
        _ => None,
    };
    out.map(Val::Int)
        .ok_or_else(|| ExecError::eval("integer overflow"))
}

fn uint_arith(op: TokenKind, a: u64, b: u64) -> Result<Val, ExecError> {
    let out = match op {
        TokenKind::Plus => a.checked_add(b),
        TokenKind::Minus => a.checked_sub(b),
        TokenKind::Star => a.checked_mul(b),
        TokenKind::Slash | TokenKind::Percent if b == 0 => {
            return Err(ExecError::eval("division by zero"))
        }
        TokenKind::Slash => a.checked_div(b),
        TokenKind::Percent => a.checked_rem(b),
        _ => None,
    };
    out.map(Val::Uint)
        .ok_or_else(|| ExecError::eval("unsigned integer overflow"))
}

fn float_arith(op: TokenKind, a: f64, b: f64) -> Result<Val, ExecError> {
    match op {
        TokenKind::Plus => Ok(Val::Float(a + b)),
        TokenKind::Minus => Ok(Val::Float(a - b)),
        TokenKind::Star => Ok(Val::Float(a * b)),
        TokenKind::Slash if b == 0.0 => Err(ExecError::eval("division by zero")),
        TokenKind::Slash => Ok(Val::Float(a / b)),
        TokenKind::Percent if b == 0.0 => Err(ExecError::eval("division by zero")),
        TokenKind::Percent => Ok(Val::Float(a % b)),
        _ => Err(ExecError::eval(format!("{:?} is not arithmetic", op))),
    }
}

fn compare(l: &Val, r: &Val) -> Result<Ordering, ExecError> {
    if let Some((a, b)) = int_pair(l, r) {
        return Ok(a.cmp(&b));
    }
    if let (Val::Uint(a), Val::Uint(b)) = (l, r) {
        return Ok(a.cmp(b));
    }
    if let (Some(a), Some(b)) = (l.as_float(), r.as_float()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| ExecError::eval("cannot compare NaN"));
    }
    match (l, r) {
        (Val::Str(a), Val::Str(b)) => Ok(a.cmp(b)),
        _ => Err(ExecError::eval(format!(
            "cannot compare {} with {}",
            l.kind(),
            r.kind()
        ))),
    }
}

pub fn binary_op(op: TokenKind, l: Val, r: Val) -> Result<Val, ExecError> {
    match op {
        TokenKind::Eq => return Ok(Val::Bool(l.loose_eq(&r))),
        TokenKind::Ne => return Ok(Val::Bool(!l.loose_eq(&r))),
        TokenKind::Lt => return Ok(Val::Bool(compare(&l, &r)? == Ordering::Less)),
        TokenKind::Le => return Ok(Val::Bool(compare(&l, &r)? != Ordering::Greater)),
        TokenKind::Gt => return Ok(Val::Bool(compare(&l, &r)? == Ordering::Greater)),
        TokenKind::Ge => return Ok(Val::Bool(compare(&l, &r)? != Ordering::Less)),
        _ => {}
    }

    match (l, r) {
        (Val::Uint(a), Val::Uint(b)) => uint_arith(op, a, b),
        (l, r) if int_pair(&l, &r).is_some() => match int_pair(&l, &r) {
            Some((a, b)) => int_arith(op, a, b),
            None => Err(ExecError::eval("integer overflow")),
        },
        (l, r) if l.is_numeric() && r.is_numeric() => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => float_arith(op, a, b),
            _ => Err(ExecError::eval("not a number")),
        },
        (Val::Str(a), r) if op == TokenKind::Plus => Ok(Val::Str(format!("{}{}", a, r))),
        (l, Val::Str(b)) if op == TokenKind::Plus => Ok(Val::Str(format!("{}{}", l, b))),
        (Val::List(mut a), Val::List(b)) if op == TokenKind::Plus => {
            a.extend(b);
            Ok(Val::List(a))
        }
        (Val::Map(mut a), Val::Map(b)) if op == TokenKind::Plus => {
            a.extend(b);
            Ok(Val::Map(a))
        }
        (l, r) => Err(ExecError::eval(format!(
            "operator {:?} cannot be applied to {} and {}",
            op,
            l.kind(),
            r.kind()
        ))),
    }
}

/// Convert a value for storage under a declared kind
pub fn coerce(value: Val, kind: Kind) -> Result<Val, ExecError> {
    match (kind, value) {
        (Kind::Float, Val::Int(n)) => Ok(Val::Float(n as f64)),
        (Kind::Float, Val::Uint(n)) => Ok(Val::Float(n as f64)),
        (Kind::Int, Val::Uint(n)) => i64::try_from(n)
            .map(Val::Int)
            .map_err(|_| ExecError::eval("integer overflow")),
        (Kind::Uint, Val::Int(n)) => u64::try_from(n)
            .map(Val::Uint)
            .map_err(|_| ExecError::eval(format!("{} is negative", n))),
        (_, v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::lexer;

    fn parse(src: &str) -> Expr {
        let phrases = lexer::phrases(src).unwrap();
        Parser::new(&phrases[0].tokens).parse_all().unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3");
        let Expr::Binary(TokenKind::Plus, _, rhs) = expr else {
            panic!("expected addition at the root");
        };
        assert!(matches!(*rhs, Expr::Binary(TokenKind::Star, _, _)));
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse("a = b = 3");
        let Expr::Assign(TokenKind::Assign, _, rhs) = expr else {
            panic!("expected assignment at the root");
        };
        assert!(matches!(*rhs, Expr::Assign(..)));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let phrases = lexer::phrases("1 = 2").unwrap();
        assert!(Parser::new(&phrases[0].tokens).parse_all().is_err());
    }

    #[test]
    fn test_binary_op_kinds() {
        assert_eq!(binary_op(TokenKind::Plus, Val::Int(2), Val::Int(3)).unwrap(), Val::Int(5));
        assert_eq!(
            binary_op(TokenKind::Star, Val::Int(2), Val::Float(1.5)).unwrap(),
            Val::Float(3.0)
        );
        assert_eq!(
            binary_op(TokenKind::Plus, Val::str("n="), Val::Int(1)).unwrap(),
            Val::str("n=1")
        );
        assert_eq!(binary_op(TokenKind::Slash, Val::Int(7), Val::Int(2)).unwrap(), Val::Int(3));
        assert!(binary_op(TokenKind::Slash, Val::Int(1), Val::Int(0)).is_err());
        assert!(binary_op(TokenKind::Plus, Val::Int(i64::MAX), Val::Int(1)).is_err());
        assert_eq!(
            binary_op(TokenKind::Lt, Val::str("a"), Val::str("b")).unwrap(),
            Val::Bool(true)
        );
    }

    #[test]
    fn test_split_top_level_respects_brackets() {
        let phrases = lexer::phrases("f(a, b), [1, 2], c").unwrap();
        let parts = split_top_level(&phrases[0].tokens);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(matching_close(&phrases[0].tokens, 1), Some(5));
    }
}
