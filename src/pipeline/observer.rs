//! Progress reporting.

use std::cell::RefCell;

/// Receives one call per completed step.
pub trait Observer {
    fn step(&self, name: &str, detail: &str);
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn step(&self, _name: &str, _detail: &str) {}
}

/// Forwards progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn step(&self, name: &str, detail: &str) {
        tracing::info!(step = name, "{}", detail);
    }
}

/// Keeps every step, in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    steps: RefCell<Vec<(String, String)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<(String, String)> {
        self.steps.borrow().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.steps.borrow().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl Observer for RecordingObserver {
    fn step(&self, name: &str, detail: &str) {
        self.steps
            .borrow_mut()
            .push((name.to_string(), detail.to_string()));
    }
}
