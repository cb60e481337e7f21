//! Control-flow frames
//!
//! Loops and CASE blocks each live on their own bounded stack. A third stack
//! records the order constructs were entered in, so BREAK can unwind across a
//! mix of loops and CASE blocks and pop each frame from the right stack.

use std::collections::hash_map;

use super::values::Val;
use crate::interpreter::executor::errors::{exit_codes, ExecError};

/* ===================== Constructs ===================== */

/// Block construct kinds tracked for BREAK/CONTINUE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct {
    For,
    Foreach,
    While,
    Case,
}

impl Construct {
    pub fn is_loop(self) -> bool {
        !matches!(self, Construct::Case)
    }

    pub fn name(self) -> &'static str {
        match self {
            Construct::For => "FOR",
            Construct::Foreach => "FOREACH",
            Construct::While => "WHILE",
            Construct::Case => "CASE",
        }
    }

    /// Construct named by a BREAK argument, e.g. `BREAK for`
    pub fn from_name(name: &str) -> Option<Construct> {
        match name.to_ascii_lowercase().as_str() {
            "for" => Some(Construct::For),
            "foreach" => Some(Construct::Foreach),
            "while" => Some(Construct::While),
            "case" => Some(Construct::Case),
            _ => None,
        }
    }
}

/* ===================== Loop Frames ===================== */

/// Iteration state of one loop
#[derive(Debug)]
pub enum LoopState {
    /// Numeric FOR
    Counter { counter: i64, end: i64, step: i64 },
    /// FOREACH over a snapshot of an ordered container
    Sequence { items: Vec<Val>, index: usize },
    /// FOREACH over a map; traversal order is unspecified
    Entries {
        iter: hash_map::IntoIter<String, Val>,
    },
    /// WHILE; the condition is re-read from the header phrase
    Condition,
}

#[derive(Debug)]
pub struct LoopFrame {
    pub construct: Construct,
    pub state: LoopState,
    /// pc of the header statement; the body starts one after it
    pub header: usize,
    /// pc of the ENDFOR/ENDWHILE statement
    pub end_at: usize,
    /// Binding slot of the loop variable
    pub var: Option<usize>,
    /// Binding slot of the FOREACH key variable
    pub key_var: Option<usize>,
}

impl LoopFrame {
    /// Advance a FOR/FOREACH frame: the next (key, value) pair, or None when done
    pub fn advance(&mut self) -> Option<(Val, Val)> {
        match &mut self.state {
            LoopState::Counter { counter, end, step } => {
                let next = counter.checked_add(*step)?;
                let in_range = if *step > 0 { next <= *end } else { next >= *end };
                if !in_range {
                    return None;
                }
                *counter = next;
                Some((Val::Int(next), Val::Int(next)))
            }
            LoopState::Sequence { items, index } => {
                *index += 1;
                let item = items.get(*index)?.clone();
                Some((Val::Int(*index as i64), item))
            }
            LoopState::Entries { iter } => iter.next().map(|(k, v)| (Val::Str(k), v)),
            LoopState::Condition => None,
        }
    }
}

/* ===================== Case Frames ===================== */

#[derive(Debug, Clone, PartialEq)]
pub struct CaseFrame {
    /// pc of the ENDCASE statement
    pub end_at: usize,
    /// Comparator value from the CASE header
    pub value: Val,
    /// A clause body has already run
    pub matched: bool,
    /// OR may still run
    pub default_ok: bool,
}

impl CaseFrame {
    pub fn new(end_at: usize, value: Val) -> Self {
        Self {
            end_at,
            value,
            matched: false,
            default_ok: true,
        }
    }

    pub fn mark_matched(&mut self) {
        self.matched = true;
        self.default_ok = false;
    }
}

/* ===================== Stacks ===================== */

/// Per-invocation control stacks with depth caps
#[derive(Debug)]
pub struct ControlStacks {
    pub loops: Vec<LoopFrame>,
    pub cases: Vec<CaseFrame>,
    pub constructs: Vec<Construct>,
    max_loops: usize,
    max_cases: usize,
}

impl ControlStacks {
    pub fn new(max_loops: usize, max_cases: usize) -> Self {
        Self {
            loops: Vec::new(),
            cases: Vec::new(),
            constructs: Vec::new(),
            max_loops,
            max_cases,
        }
    }

    pub fn depth(&self) -> usize {
        self.constructs.len()
    }

    pub fn innermost(&self) -> Option<Construct> {
        self.constructs.last().copied()
    }

    pub fn push_loop(&mut self, frame: LoopFrame) -> Result<(), ExecError> {
        if self.loops.len() >= self.max_loops {
            return Err(ExecError::fatal(
                exit_codes::SYNTAX,
                format!("maximum loop depth reached ({})", self.max_loops),
            ));
        }
        self.constructs.push(frame.construct);
        self.loops.push(frame);
        Ok(())
    }

    pub fn push_case(&mut self, frame: CaseFrame) -> Result<(), ExecError> {
        if self.cases.len() >= self.max_cases {
            return Err(ExecError::fatal(
                exit_codes::SYNTAX,
                format!("maximum CASE nesting reached ({})", self.max_cases),
            ));
        }
        self.constructs.push(Construct::Case);
        self.cases.push(frame);
        Ok(())
    }

    /// Innermost loop frame, provided the innermost construct is a loop
    pub fn current_loop(&mut self, closer: &str) -> Result<&mut LoopFrame, ExecError> {
        match self.innermost() {
            Some(c) if c.is_loop() => self
                .loops
                .last_mut()
                .ok_or_else(|| ExecError::Syntax(format!("{} outside of a loop", closer))),
            _ => Err(ExecError::Syntax(format!("{} outside of a loop", closer))),
        }
    }

    pub fn current_case(&mut self, clause: &str) -> Result<&mut CaseFrame, ExecError> {
        match self.innermost() {
            Some(Construct::Case) => self
                .cases
                .last_mut()
                .ok_or_else(|| ExecError::Syntax(format!("{} outside of a CASE block", clause))),
            _ => Err(ExecError::Syntax(format!(
                "{} outside of a CASE block",
                clause
            ))),
        }
    }

    pub fn pop_loop(&mut self) -> Option<LoopFrame> {
        if self.innermost().is_some_and(Construct::is_loop) {
            self.constructs.pop();
            self.loops.pop()
        } else {
            None
        }
    }

    pub fn pop_case(&mut self) -> Option<CaseFrame> {
        if self.innermost() == Some(Construct::Case) {
            self.constructs.pop();
            self.cases.pop()
        } else {
            None
        }
    }

    /// How many constructs a BREAK argument unwinds
    ///
    /// No argument unwinds one. A count unwinds that many. A construct name
    /// unwinds everything up to and including the innermost construct of
    /// that type.
    pub fn break_count(&self, target: BreakTarget) -> Result<usize, ExecError> {
        let depth = self.depth();
        if depth == 0 {
            return Err(ExecError::Syntax(
                "BREAK outside of a loop or CASE block".into(),
            ));
        }
        match target {
            BreakTarget::Innermost => Ok(1),
            BreakTarget::Count(n) if n >= 1 && n <= depth => Ok(n),
            BreakTarget::Count(n) => Err(ExecError::Syntax(format!(
                "cannot BREAK {} levels from a nesting depth of {}",
                n, depth
            ))),
            BreakTarget::Construct(kind) => self
                .constructs
                .iter()
                .rposition(|c| *c == kind)
                .map(|idx| depth - idx)
                .ok_or_else(|| {
                    ExecError::Syntax(format!("BREAK {} outside of a {} block", kind.name(), kind.name()))
                }),
        }
    }

    /// Pop `count` constructs, each from its own stack exactly once.
    /// Returns the pc of the closing statement of the last construct popped.
    pub fn unwind(&mut self, count: usize) -> Result<usize, ExecError> {
        let mut end_at = None;
        for _ in 0..count {
            let construct = self
                .constructs
                .pop()
                .ok_or_else(|| ExecError::Syntax("BREAK unwound past the outermost block".into()))?;
            let frame_end = if construct.is_loop() {
                self.loops.pop().map(|f| f.end_at)
            } else {
                self.cases.pop().map(|f| f.end_at)
            };
            end_at = Some(frame_end.ok_or_else(|| {
                ExecError::Syntax(format!("{} stack out of step", construct.name()))
            })?);
        }
        end_at.ok_or_else(|| ExecError::Syntax("BREAK with nothing to unwind".into()))
    }
}

/// Parsed BREAK argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakTarget {
    Innermost,
    Count(usize),
    Construct(Construct),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_frame(construct: Construct, end_at: usize) -> LoopFrame {
        LoopFrame {
            construct,
            state: LoopState::Condition,
            header: 0,
            end_at,
            var: None,
            key_var: None,
        }
    }

    #[test]
    fn test_unwind_pops_each_stack_once() {
        let mut stacks = ControlStacks::new(8, 8);
        stacks.push_loop(loop_frame(Construct::For, 20)).unwrap();
        stacks.push_case(CaseFrame::new(15, Val::Nil)).unwrap();
        stacks.push_loop(loop_frame(Construct::While, 10)).unwrap();

        let count = stacks
            .break_count(BreakTarget::Construct(Construct::For))
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(stacks.unwind(count).unwrap(), 20);
        assert!(stacks.loops.is_empty());
        assert!(stacks.cases.is_empty());
        assert!(stacks.constructs.is_empty());
    }

    #[test]
    fn test_break_count_by_depth() {
        let mut stacks = ControlStacks::new(8, 8);
        stacks.push_loop(loop_frame(Construct::For, 20)).unwrap();
        stacks.push_case(CaseFrame::new(15, Val::Nil)).unwrap();

        assert_eq!(stacks.break_count(BreakTarget::Innermost).unwrap(), 1);
        assert_eq!(stacks.break_count(BreakTarget::Count(2)).unwrap(), 2);
        assert!(stacks.break_count(BreakTarget::Count(3)).is_err());

        assert_eq!(stacks.unwind(1).unwrap(), 15);
        assert_eq!(stacks.loops.len(), 1);
        assert!(stacks.cases.is_empty());
    }

    #[test]
    fn test_depth_cap_is_fatal() {
        let mut stacks = ControlStacks::new(1, 1);
        stacks.push_loop(loop_frame(Construct::For, 5)).unwrap();
        let err = stacks.push_loop(loop_frame(Construct::For, 4)).unwrap_err();
        assert!(err.is_hard());
    }

    #[test]
    fn test_counter_advance_stops_at_end() {
        let mut frame = loop_frame(Construct::For, 3);
        frame.state = LoopState::Counter {
            counter: 1,
            end: 3,
            step: 1,
        };
        assert_eq!(frame.advance(), Some((Val::Int(2), Val::Int(2))));
        assert_eq!(frame.advance(), Some((Val::Int(3), Val::Int(3))));
        assert_eq!(frame.advance(), None);
    }
}
