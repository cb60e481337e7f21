//! Call table allocator
//!
//! Every function definition and every invocation owns a numeric slot. A
//! finished invocation is flagged disposable, but its slot is only recycled
//! once its shyness counter has decayed to zero during periodic sweeps, since
//! an async handle may still be about to read the stored return values.

use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use tracing::debug;

use super::errors::ExecError;
use super::types::Val;
use crate::config::CallTableConfig;

/// Appended to a name template to request a unique instance name
pub const UNIQUE_MARKER: char = '@';

/* ===================== Entries ===================== */

/// Per-invocation bookkeeping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallTableEntry {
    /// Function space whose body runs in this slot
    pub base: u32,
    /// Slot of the invoking frame
    pub caller: u32,
    pub name: String,
    pub call_line: usize,
    /// Nesting level along the caller chain; top-level frames are 1
    pub depth: usize,
    pub retvals: Option<Vec<Val>>,
    pub gc: bool,
    pub gc_shyness: u32,
    pub disposable: bool,
    /// Binding layout has been set up by the caller
    pub prepared: bool,
    pub in_use: bool,
}

impl CallTableEntry {
    /// Descriptor for an invocation of `base` made from `caller`
    pub fn invocation(base: u32, caller: u32, call_line: usize) -> Self {
        Self {
            base,
            caller,
            call_line,
            prepared: true,
            ..Default::default()
        }
    }

    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

/* ===================== Allocator State ===================== */

#[derive(Debug)]
pub struct CallTableState {
    entries: Vec<CallTableEntry>,
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
    allocations: u64,
    config: CallTableConfig,
}

impl CallTableState {
    fn new(config: CallTableConfig) -> Self {
        let mut entries = Vec::with_capacity(config.initial_capacity);
        entries.resize_with(config.initial_capacity.max(2), CallTableEntry::default);
        // Slot 0 is never handed out.
        entries[0].in_use = true;
        Self {
            entries,
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            allocations: 0,
            config,
        }
    }

    /// Issue a slot. The caller must hold the table lock.
    pub fn allocate(
        &mut self,
        template: &str,
        prepared: Option<CallTableEntry>,
    ) -> Result<(u32, String), ExecError> {
        self.allocations += 1;
        if self.allocations % self.config.gc_interval == 0 {
            self.sweep();
        }

        let slot = match self.entries.iter().skip(1).position(|e| !e.in_use) {
            Some(offset) => offset + 1,
            None => self.grow()?,
        };
        let id = slot as u32;

        let name = if template.ends_with(UNIQUE_MARKER) {
            format!("{}{}", template, id)
        } else {
            template.to_string()
        };

        let mut entry = prepared.unwrap_or_default();
        entry.name = name.clone();
        entry.in_use = true;
        entry.gc = false;
        entry.disposable = false;
        entry.retvals = None;
        self.entries[slot] = entry;

        if let Some(old) = self.by_name.insert(name.clone(), id) {
            if old != id {
                self.by_id.remove(&old);
            }
        }
        self.by_id.insert(id, name.clone());

        Ok((id, name))
    }

    fn grow(&mut self) -> Result<usize, ExecError> {
        let current = self.entries.len();
        if current >= self.config.max_capacity {
            return Err(ExecError::CallTableExhausted(current));
        }
        let next = (current * 2).min(self.config.max_capacity);
        debug!(from = current, to = next, "call table grown");
        self.entries.resize_with(next, CallTableEntry::default);
        Ok(current)
    }

    /// Decay shyness on finished slots and reclaim those that reach zero
    pub fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;
        for (slot, entry) in self.entries.iter_mut().enumerate().skip(1) {
            if !(entry.in_use && entry.gc && entry.disposable) {
                continue;
            }
            if entry.gc_shyness > 0 {
                entry.gc_shyness -= 1;
                continue;
            }
            let id = slot as u32;
            if let Some(name) = self.by_id.remove(&id) {
                if self.by_name.get(&name) == Some(&id) {
                    self.by_name.remove(&name);
                }
            }
            *entry = CallTableEntry::default();
            reclaimed += 1;
        }
        if reclaimed > 0 {
            debug!(reclaimed, "call table sweep");
        }
        reclaimed
    }

    pub fn entry(&self, slot: u32) -> Option<&CallTableEntry> {
        self.entries.get(slot as usize).filter(|e| e.in_use)
    }

    pub fn entry_mut(&mut self, slot: u32) -> Option<&mut CallTableEntry> {
        self.entries.get_mut(slot as usize).filter(|e| e.in_use)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slots currently issued, excluding the reserved slot 0
    pub fn live(&self) -> usize {
        self.entries.iter().skip(1).filter(|e| e.in_use).count()
    }
}

/* ===================== Shared Allocator ===================== */

/// Call table service; one lock guards allocate, reclaim and registration
#[derive(Debug)]
pub struct CallTable {
    state: RwLock<CallTableState>,
}

impl CallTable {
    pub fn new(config: CallTableConfig) -> Self {
        Self {
            state: RwLock::new(CallTableState::new(config)),
        }
    }

    /// Take the table lock for a sequence of operations
    pub fn lock(&self) -> RwLockWriteGuard<'_, CallTableState> {
        self.state.write()
    }

    /// Issue a slot, taking the lock for the duration
    pub fn allocate(
        &self,
        template: &str,
        prepared: Option<CallTableEntry>,
    ) -> Result<(u32, String), ExecError> {
        self.state.write().allocate(template, prepared)
    }

    pub fn entry(&self, slot: u32) -> Option<CallTableEntry> {
        self.state.read().entry(slot).cloned()
    }

    pub fn base_of(&self, slot: u32) -> Option<u32> {
        self.state.read().entry(slot).map(|e| e.base)
    }

    pub fn find(&self, name: &str) -> Option<u32> {
        self.state.read().by_name.get(name).copied()
    }

    pub fn name_of(&self, slot: u32) -> Option<String> {
        self.state.read().by_id.get(&slot).cloned()
    }

    /// Call depth of the frame in `slot`; 0 for slot 0 and definitions
    pub fn depth_of(&self, slot: u32) -> usize {
        self.state.read().entry(slot).map_or(0, |e| e.depth)
    }

    /// Record return values at the end of an invocation
    pub fn finish_invocation(&self, slot: u32, retvals: Vec<Val>, disposable: bool) {
        if let Some(entry) = self.state.write().entry_mut(slot) {
            entry.retvals = Some(retvals);
            if disposable {
                entry.disposable = true;
            }
        }
    }

    pub fn take_retvals(&self, slot: u32) -> Option<Vec<Val>> {
        self.state
            .write()
            .entry_mut(slot)
            .and_then(|e| e.retvals.take())
    }

    /// Hand a slot back for reuse after `shyness` sweeps
    pub fn release(&self, slot: u32, shyness: u32) {
        if let Some(entry) = self.state.write().entry_mut(slot) {
            entry.gc = true;
            entry.disposable = true;
            entry.gc_shyness = shyness;
        }
    }

    /// Flag a finished slot disposable without releasing it yet
    pub fn mark_disposable(&self, slot: u32, shyness: u32) {
        if let Some(entry) = self.state.write().entry_mut(slot) {
            entry.disposable = true;
            entry.gc_shyness = shyness;
        }
    }

    pub fn sweep(&self) -> usize {
        self.state.write().sweep()
    }

    pub fn capacity(&self) -> usize {
        self.state.read().capacity()
    }

    pub fn live(&self) -> usize {
        self.state.read().live()
    }
}
