//! Core types for the phrase executor

pub mod control;
pub mod token;
pub mod values;
pub mod variable;

pub use control::{BreakTarget, CaseFrame, Construct, ControlStacks, LoopFrame, LoopState};
pub use token::{JumpCache, Phrase, Token, TokenKind};
pub use values::{FieldDef, Kind, Record, Val};
pub use variable::{ensure_slot, Variable};
