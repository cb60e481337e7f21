//! Async task scheduler
//!
//! `spawn` runs a full engine invocation on its own OS thread with a fresh
//! variable array. The result travels back through a oneshot channel that the
//! caller files under a key in a handle map. `await_handles` polls that map
//! without blocking; `wait_all` is the blocking, cancellable alternative.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::errors::{exit_codes, ExecError};
use super::types::Val;
use super::vm::{Interpreter, Invocation};

/* ===================== Handles ===================== */

/// The single message a task sends
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub slot: u32,
    pub result: Val,
}

#[derive(Debug)]
pub struct AsyncHandle {
    pub rx: oneshot::Receiver<Envelope>,
    pub slot: u32,
    pub instance: String,
}

/// Caller-owned map of pending task results, keyed by handle name
#[derive(Clone, Default)]
pub struct HandleMap(Arc<Mutex<HashMap<String, AsyncHandle>>>);

impl HandleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, handle: AsyncHandle) {
        self.0.lock().insert(key.into(), handle);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl PartialEq for HandleMap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HandleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleMap")
            .field("pending", &self.keys())
            .finish()
    }
}

/// A started task
#[derive(Debug)]
pub struct Spawned {
    /// None for fire-and-forget tasks
    pub rx: Option<oneshot::Receiver<Envelope>>,
    pub slot: u32,
    pub instance: String,
}

impl Spawned {
    /// Turn into a handle for a handle map; None for fire-and-forget tasks
    pub fn into_handle(self) -> Option<AsyncHandle> {
        let Spawned { rx, slot, instance } = self;
        rx.map(|rx| AsyncHandle { rx, slot, instance })
    }
}

/* ===================== Scheduler ===================== */

impl Interpreter {
    /// Run function space `target` on a new thread
    pub fn spawn(
        self: &Arc<Self>,
        caller: u32,
        target: u32,
        auto_close: bool,
        line: usize,
        args: Vec<Val>,
    ) -> Result<Spawned, ExecError> {
        let space = self
            .spaces
            .get(target)
            .ok_or_else(|| ExecError::UnknownFunction(format!("#{}", target)))?;
        let entry = self.nested_entry(target, caller, line)?;
        let (slot, instance) = self.allocate(&format!("{}@", space.name), Some(entry))?;

        let (tx, rx) = if auto_close {
            (None, None)
        } else {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        };

        let interp = Arc::clone(self);
        let worker = move || {
            let mut vars = Vec::new();
            if let Err(e) = interp.execute(&mut vars, Invocation::new(slot, caller, args)) {
                warn!(task = slot, error = %e, "async task failed");
            }
            let retvals = interp
                .calltable
                .entry(slot)
                .and_then(|e| e.retvals)
                .unwrap_or_default();
            let result = Val::from_returns(retvals);
            let ct = &interp.config().calltable;

            match tx {
                None => interp.calltable.release(slot, ct.call_shyness),
                Some(tx) => {
                    interp.calltable.mark_disposable(slot, ct.async_shyness);
                    if tx.send(Envelope { slot, result }).is_err() {
                        // Nobody is listening any more.
                        interp.calltable.release(slot, 0);
                    }
                }
            }
        };

        thread::Builder::new()
            .name(instance.clone())
            .stack_size(self.engine_stack_size())
            .spawn(worker)
            .map_err(|e| ExecError::fatal(exit_codes::FATAL, format!("could not start task: {}", e)))?;

        debug!(task = slot, instance = %instance, auto_close, "async task spawned");
        Ok(Spawned { rx, slot, instance })
    }

    /// Collect finished results from `handles`.
    ///
    /// One non-blocking pass drains every handle whose result has arrived and
    /// removes it from the map. With `wait_all` the pass repeats until the map
    /// is empty.
    pub fn await_handles(&self, handles: &HandleMap, wait_all: bool) -> HashMap<String, Val> {
        let shyness = self.config().calltable.await_shyness;
        let mut results = HashMap::new();
        loop {
            let remaining = {
                let mut map = handles.0.lock();
                let keys: Vec<String> = map.keys().cloned().collect();
                for key in keys {
                    let outcome = match map.get_mut(&key) {
                        Some(handle) => match handle.rx.try_recv() {
                            Ok(env) => Some((env.slot, env.result)),
                            Err(TryRecvError::Empty) => None,
                            Err(TryRecvError::Closed) => Some((handle.slot, Val::Nil)),
                        },
                        None => None,
                    };
                    if let Some((slot, result)) = outcome {
                        map.remove(&key);
                        self.calltable.release(slot, shyness);
                        debug!(task = slot, key = %key, "async result collected");
                        results.insert(key, result);
                    }
                }
                map.len()
            };
            if !wait_all || remaining == 0 {
                break;
            }
            thread::yield_now();
        }
        results
    }

    /// Block until every handle has resolved, or `cancel` fires.
    ///
    /// On cancellation the unresolved handles are put back into the map and
    /// the results collected so far come back as the error value.
    pub async fn wait_all(
        &self,
        handles: &HandleMap,
        cancel: CancellationToken,
    ) -> Result<HashMap<String, Val>, HashMap<String, Val>> {
        let shyness = self.config().calltable.await_shyness;
        let pending: Vec<(String, AsyncHandle)> = handles.0.lock().drain().collect();
        let mut results = HashMap::new();
        let mut queue = pending.into_iter();

        while let Some((key, mut handle)) = queue.next() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let mut map = handles.0.lock();
                    map.insert(key, handle);
                    map.extend(queue);
                    debug!(collected = results.len(), pending = map.len(), "wait cancelled");
                    return Err(results);
                }
                received = &mut handle.rx => {
                    let (slot, result) = match received {
                        Ok(env) => (env.slot, env.result),
                        Err(_) => (handle.slot, Val::Nil),
                    };
                    self.calltable.release(slot, shyness);
                    results.insert(key, result);
                }
            }
        }
        Ok(results)
    }
}
