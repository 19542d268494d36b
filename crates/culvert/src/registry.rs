//! Service name to pipe path mapping

use std::collections::HashMap;
use std::sync::Mutex;

/// Maps symbolic service names to OS pipe paths.
///
/// Owned by a [`Transport`](crate::Transport) instance; entries are added
/// during client setup and never removed or replaced. The lock is held only
/// for map access, never across I/O.
#[derive(Debug, Default)]
pub(crate) struct ServiceRegistry {
    pipes: Mutex<HashMap<String, String>>,
}

impl ServiceRegistry {
    /// Maps `service_name` to `pipe_path`.
    ///
    /// # Panics
    ///
    /// Panics if `service_name` is already registered. A duplicate
    /// registration is a programming error in the calling code, not a
    /// runtime condition to handle.
    pub(crate) fn register(&self, service_name: &str, pipe_path: &str) {
        let mut pipes = self.pipes.lock().expect("registry lock poisoned");
        if pipes.contains_key(service_name) {
            // Panic without the guard held so the first mapping stays
            // readable if the panic is caught.
            drop(pipes);
            panic!("service {service_name} already registered");
        }
        pipes.insert(service_name.to_string(), pipe_path.to_string());
    }

    /// Resolves a service name to its pipe path, if registered.
    pub(crate) fn lookup(&self, service_name: &str) -> Option<String> {
        self.pipes
            .lock()
            .expect("registry lock poisoned")
            .get(service_name)
            .cloned()
    }
}
