//! Observability hooks, SPEC_FULL §3 ("Hooks as capability set" from
//! spec §9 design notes, made concrete). Invocation is guarded: a
//! panicking hook is caught and logged, never propagated (spec §7).

use std::panic::AssertUnwindSafe;

use super::Action;

#[derive(Debug, Clone)]
pub enum HookEvent<'a> {
    TaskStart { task_id: &'a str },
    TaskEnd { task_id: &'a str, outcome: &'a str },
    IterationStart { task_id: &'a str, iteration: u32 },
    IterationEnd { task_id: &'a str, iteration: u32, result: &'a str },
    Action { task_id: &'a str, action: &'a Action },
    Anomaly { description: &'a str },
}

type HookFn = Box<dyn Fn(HookEvent) + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    callbacks: Vec<HookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, callback: impl Fn(HookEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn fire(&self, event: HookEvent) {
        for callback in &self.callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event.clone())));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "hook panicked".to_string());
                tracing::warn!(error = %message, "hook callback panicked, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn panicking_hook_is_caught_and_does_not_abort() {
        let hooks = Hooks::new().register(|_event| panic!("boom"));
        hooks.fire(HookEvent::Anomaly { description: "test" });
    }

    #[test]
    fn hooks_are_invoked_in_registration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let hooks = Hooks::new().register(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        hooks.fire(HookEvent::Anomaly { description: "x" });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
