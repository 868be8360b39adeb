//! Registration seam between a host framework and the span handler.
//!
//! The host exposes a [`HookRegistry`]; the [`Instrumentor`] installs the
//! handler's [`Callbacks`] there under a target name and removes them again
//! on uninstall. Nothing in the host is rewritten in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::Event;
use crate::model::{ErrorInfo, Instance};
use crate::payload::Payload;

/// A host operation began.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStart {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub instance: Option<Instance>,
    #[serde(default)]
    pub bound_args: Payload,
}

/// A host operation returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEnd {
    pub id: String,
    #[serde(default)]
    pub instance: Option<Instance>,
    #[serde(default)]
    pub result: Payload,
}

/// A host operation raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    pub id: String,
    pub error: ErrorInfo,
}

/// What the host calls while an instrumented operation runs.
pub trait Callbacks: Send + Sync {
    fn on_start(&self, op: &OperationStart);
    fn on_progress(&self, event: &Event);
    fn on_end(&self, op: &OperationEnd);
    fn on_error(&self, op: &OperationError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

/// Host-side registration point.
pub trait HookRegistry: Send + Sync {
    fn register(&self, target: &str, callbacks: Arc<dyn Callbacks>) -> HookId;
    /// True when the hook was registered.
    fn unregister(&self, id: HookId) -> bool;
}

struct Hook {
    id: HookId,
    target: String,
    callbacks: Arc<dyn Callbacks>,
}

/// In-process registry that fans host notifications out to every hook
/// registered for the notifying target.
#[derive(Default)]
pub struct HookBus {
    next_id: AtomicU64,
    hooks: RwLock<Vec<Hook>>,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBus")
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Callbacks are called without the registry lock held, so a callback
    /// may register or unregister hooks.
    fn listeners(&self, target: &str) -> Vec<Arc<dyn Callbacks>> {
        self.hooks
            .read()
            .iter()
            .filter(|h| h.target == target)
            .map(|h| h.callbacks.clone())
            .collect()
    }

    pub fn start(&self, target: &str, op: &OperationStart) {
        for cb in self.listeners(target) {
            cb.on_start(op);
        }
    }

    pub fn progress(&self, target: &str, event: &Event) {
        for cb in self.listeners(target) {
            cb.on_progress(event);
        }
    }

    pub fn end(&self, target: &str, op: &OperationEnd) {
        for cb in self.listeners(target) {
            cb.on_end(op);
        }
    }

    pub fn error(&self, target: &str, op: &OperationError) {
        for cb in self.listeners(target) {
            cb.on_error(op);
        }
    }
}

impl HookRegistry for HookBus {
    fn register(&self, target: &str, callbacks: Arc<dyn Callbacks>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.hooks.write().push(Hook {
            id,
            target: target.to_string(),
            callbacks,
        });
        id
    }

    fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        hooks.len() != before
    }
}

/// Installs one set of callbacks on a registry, once per target.
pub struct Instrumentor {
    registry: Arc<dyn HookRegistry>,
    callbacks: Arc<dyn Callbacks>,
    installed: Mutex<HashMap<String, HookId>>,
}

impl std::fmt::Debug for Instrumentor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentor")
            .field("installed", &self.installed.lock().len())
            .finish()
    }
}

impl Instrumentor {
    pub fn new(registry: Arc<dyn HookRegistry>, callbacks: Arc<dyn Callbacks>) -> Self {
        Self {
            registry,
            callbacks,
            installed: Mutex::new(HashMap::new()),
        }
    }

    /// False when `target` was already installed.
    pub fn install(&self, target: &str) -> bool {
        let mut installed = self.installed.lock();
        if installed.contains_key(target) {
            debug!(target, "already instrumented");
            return false;
        }
        let id = self.registry.register(target, self.callbacks.clone());
        installed.insert(target.to_string(), id);
        true
    }

    /// False when `target` was not installed.
    pub fn uninstall(&self, target: &str) -> bool {
        let Some(id) = self.installed.lock().remove(target) else {
            return false;
        };
        self.registry.unregister(id)
    }

    pub fn uninstall_all(&self) {
        let ids: Vec<HookId> = self.installed.lock().drain().map(|(_, id)| id).collect();
        for id in ids {
            self.registry.unregister(id);
        }
    }

    pub fn is_installed(&self, target: &str) -> bool {
        self.installed.lock().contains_key(target)
    }
}

impl Drop for Instrumentor {
    fn drop(&mut self) {
        self.uninstall_all();
    }
}
