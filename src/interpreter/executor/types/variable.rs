//! Variable slots
//!
//! Each invocation owns a `Vec<Variable>` indexed by binding slot. The array is
//! never shared between threads.

use super::values::{Kind, Val};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Val,
    pub kind: Kind,
    pub declared: bool,
    /// Struct type name for record-typed declarations
    pub type_override: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Val) -> Self {
        Self {
            name: name.into(),
            value,
            ..Default::default()
        }
    }

    /// Store a value, honouring any VAR declaration on this slot
    pub fn assign(&mut self, value: Val) -> Result<(), String> {
        if self.declared {
            if let Some(type_name) = &self.type_override {
                match &value {
                    Val::Record(rec) if &rec.type_name == type_name => {}
                    Val::Nil => {}
                    other => {
                        return Err(format!(
                            "'{}' is declared as {}, cannot assign {}",
                            self.name,
                            type_name,
                            other.kind()
                        ))
                    }
                }
            } else if !self.kind.accepts(value.kind()) {
                return Err(format!(
                    "'{}' is declared as {}, cannot assign {}",
                    self.name,
                    self.kind,
                    value.kind()
                ));
            }
        }
        self.value = value;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.value = Val::Nil;
        self.kind = Kind::Any;
        self.declared = false;
        self.type_override = None;
    }
}

/// Grow a variable array so `slot` is addressable, keeping existing entries
pub fn ensure_slot(vars: &mut Vec<Variable>, slot: usize) {
    if vars.len() <= slot {
        vars.resize_with(slot + 1, Variable::default);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_kind_rejects_other_kinds() {
        let mut v = Variable::new("n", Val::Int(0));
        v.kind = Kind::Int;
        v.declared = true;
        assert!(v.assign(Val::Int(5)).is_ok());
        assert!(v.assign(Val::str("x")).is_err());
        assert_eq!(v.value, Val::Int(5));
    }

    #[test]
    fn test_ensure_slot_preserves_existing_values() {
        let mut vars = vec![Variable::new("a", Val::Int(1))];
        ensure_slot(&mut vars, 4);
        assert_eq!(vars.len(), 5);
        assert_eq!(vars[0].value, Val::Int(1));
        assert_eq!(vars[4].value, Val::Nil);
    }
}
