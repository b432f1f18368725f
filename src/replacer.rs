use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

type Supplier = Arc<dyn Fn() -> String + Send + Sync>;
type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Overrides that replace the expansion of named productions.
///
/// While a name is registered here the generator never looks it up in the
/// registry: the supplier's output is used as a finished token. Suppliers may
/// keep state between calls; reset hooks registered with
/// [`Replacer::on_reset`] run once after every top-level generation, so that
/// state restarts for the next independent run.
///
/// Clones share suppliers, hooks and the run lock, so runs on a replacer and
/// its clones never interleave on another thread.
#[derive(Default, Clone)]
pub struct Replacer {
    suppliers: HashMap<String, Supplier>,
    resets: Vec<ResetHook>,
    /// Nesting depth of the runs held by the owning thread
    run_lock: Arc<ReentrantMutex<Cell<usize>>>,
}

impl Replacer {
    pub fn new() -> Self {
        Replacer::default()
    }

    /// Register a supplier for `name`, replacing any previous one
    pub fn add<F>(&mut self, name: &str, supplier: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.suppliers.insert(name.to_string(), Arc::new(supplier));
        self
    }

    /// Always expand `name` to `value`; an empty value contributes nothing
    pub fn add_const(&mut self, name: &str, value: &str) -> &mut Self {
        let value = value.to_string();
        self.add(name, move || value.clone())
    }

    /// Expand `name` to fresh identifiers `{prefix}1`, `{prefix}2`, … that
    /// restart from 1 on every generation run
    pub fn add_sequence(&mut self, name: &str, prefix: &str) -> &mut Self {
        let next = Arc::new(AtomicUsize::new(0));
        let prefix = prefix.to_string();

        let counter = Arc::clone(&next);
        self.add(name, move || {
            format!("{}{}", prefix, counter.fetch_add(1, Ordering::SeqCst) + 1)
        });
        self.on_reset(move || next.store(0, Ordering::SeqCst))
    }

    /// Append a hook to the reset chain
    pub fn on_reset<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.resets.push(Arc::new(hook));
        self
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.suppliers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.suppliers.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.suppliers.is_empty()
    }

    /// Names with a registered override, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.suppliers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Produce the override for `name`.
    ///
    /// # Panics
    ///
    /// Panics if nothing is registered for `name`; callers check
    /// [`Replacer::contains`] first, so reaching this is a configuration bug.
    pub fn run(&self, name: &str) -> String {
        match self.suppliers.get(name) {
            Some(supplier) => supplier(),
            None => panic!("`{}` not found in replacer", name),
        }
    }

    /// Invoke every reset hook in registration order
    pub fn reset(&self) {
        for hook in &self.resets {
            hook();
        }
    }

    /// Start a generation run.
    ///
    /// The guard serializes runs across threads that share this replacer or
    /// a clone of it. A run started by a supplier on the thread that already
    /// holds the lock nests inside the outer one; only the outermost guard
    /// calls [`Replacer::reset`] when dropped.
    pub fn begin_run(&self) -> RunGuard<'_> {
        let depth = self.run_lock.lock();
        depth.set(depth.get() + 1);
        RunGuard {
            replacer: self,
            depth,
        }
    }
}

impl fmt::Debug for Replacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replacer")
            .field("names", &self.names())
            .field("reset_hooks", &self.resets.len())
            .finish()
    }
}

/// Held for the duration of one top-level generation
pub struct RunGuard<'a> {
    replacer: &'a Replacer,
    depth: ReentrantMutexGuard<'a, Cell<usize>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.depth.get() - 1;
        self.depth.set(remaining);
        if remaining == 0 {
            self.replacer.reset();
        }
    }
}
