//! Pre/post request listeners.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::server::Server;

/// Identity of one dispatched request, unique for the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback invoked with the selected server and the request identity.
pub type Hook = Arc<dyn Fn(&Server, RequestId) + Send + Sync>;

/// Ordered list of hooks, invoked in registration order.
///
/// Registration swaps in a new list, so invocation never holds a lock
/// while user callbacks run.
pub struct HookList {
    hooks: ArcSwap<Vec<Hook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self {
            hooks: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register(&self, hook: Hook) {
        self.hooks.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(hook.clone());
            next
        });
    }

    pub fn invoke(&self, server: &Server, id: RequestId) {
        for hook in self.hooks.load().iter() {
            hook(server, id);
        }
    }

    /// The registered hooks, in invocation order.
    pub fn snapshot(&self) -> Arc<Vec<Hook>> {
        self.hooks.load_full()
    }

    pub fn len(&self) -> usize {
        self.hooks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HookList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookList").field("len", &self.len()).finish()
    }
}

/// Anything that accepts pre/post request hooks. Trackers use this to wire
/// themselves into a dispatcher.
pub trait HookRegistrar {
    fn register_pre_hook(&self, hook: Hook);
    fn register_post_hook(&self, hook: Hook);
}
