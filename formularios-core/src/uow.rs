//! Unit of work: staged writes plus hooks that only run after a successful commit.

use crate::error::Result;
use futures::future::BoxFuture;
use opendal::Operator;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error};

type CommitHook = Box<dyn FnOnce(Operator) -> BoxFuture<'static, Result<()>> + Send>;

enum StagedOp {
    Write { path: String, bytes: Vec<u8> },
    Delete { path: String },
}

pub struct UnitOfWork {
    op: Operator,
    staged: Vec<StagedOp>,
    hooks: Vec<(String, CommitHook)>,
    hook_keys: HashSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub writes: usize,
    pub deletes: usize,
    pub hooks_run: Vec<String>,
}

impl UnitOfWork {
    pub fn begin(op: &Operator) -> Self {
        Self {
            op: op.clone(),
            staged: Vec::new(),
            hooks: Vec::new(),
            hook_keys: HashSet::new(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn stage_json<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.staged.push(StagedOp::Write {
            path: path.into(),
            bytes,
        });
        Ok(())
    }

    pub fn stage_delete(&mut self, path: impl Into<String>) {
        self.staged.push(StagedOp::Delete { path: path.into() });
    }

    /// Registers `hook` to run once the staged operations are persisted.
    ///
    /// Returns `false` when a hook with the same key is already queued; the
    /// second registration is dropped.
    pub fn on_commit<F, Fut>(&mut self, key: impl Into<String>, hook: F) -> bool
    where
        F: FnOnce(Operator) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = key.into();
        if !self.hook_keys.insert(key.clone()) {
            debug!(hook = %key, "commit hook already registered");
            return false;
        }
        self.hooks.push((key, Box::new(move |op| Box::pin(hook(op)))));
        true
    }

    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Applies staged operations in order, then runs the hooks in
    /// registration order. Hooks never run if any staged operation fails.
    pub async fn commit(self) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        for staged in self.staged {
            match staged {
                StagedOp::Write { path, bytes } => {
                    self.op.write(&path, bytes).await?;
                    report.writes += 1;
                }
                StagedOp::Delete { path } => {
                    crate::storage::delete_path(&self.op, &path).await?;
                    report.deletes += 1;
                }
            }
        }

        for (key, hook) in self.hooks {
            if let Err(err) = hook(self.op.clone()).await {
                error!(hook = %key, error = %err, "commit hook failed");
                return Err(err);
            }
            debug!(hook = %key, "commit hook executed");
            report.hooks_run.push(key);
        }
        Ok(report)
    }

    /// Discards staged operations and hooks.
    pub fn rollback(self) {
        debug!(
            staged = self.staged.len(),
            hooks = self.hooks.len(),
            "unit of work rolled back"
        );
    }
}

static FORM_LOCKS: OnceLock<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
    OnceLock::new();

/// Per-form lock serializing version ordinals and page sequences.
pub(crate) fn form_lock(form_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    let registry = FORM_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks
        .entry(form_id.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Drops the lock entry of a deleted form.
pub(crate) fn release_form_lock(form_id: &str) {
    if let Some(registry) = FORM_LOCKS.get() {
        let mut locks = match registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.remove(form_id);
    }
}

#[cfg(test)]
pub(crate) fn has_form_lock(form_id: &str) -> bool {
    FORM_LOCKS
        .get()
        .map(|registry| match registry.lock() {
            Ok(guard) => guard.contains_key(form_id),
            Err(poisoned) => poisoned.into_inner().contains_key(form_id),
        })
        .unwrap_or(false)
}
