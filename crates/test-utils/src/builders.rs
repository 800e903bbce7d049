#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use taskdag::engine::TaskDeclaration;
use taskdag::exec::{TaskFailure, TaskInput};

/// Shared record of function-task executions, in completion order.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str) {
        self.inner
            .lock()
            .expect("execution log lock")
            .push((name.to_string(), Instant::now()));
    }

    /// Task names in completion order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("execution log lock")
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("execution log lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    pub fn finished_at(&self, name: &str) -> Option<Instant> {
        self.inner
            .lock()
            .expect("execution log lock")
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, at)| *at)
    }

    /// Whether `first` completed strictly before `second`.
    pub fn finished_before(&self, first: &str, second: &str) -> bool {
        match (self.finished_at(first), self.finished_at(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

/// Function task that records its completion and returns `output`.
pub fn fn_task(name: &str, log: &ExecutionLog, output: Value) -> TaskDeclaration {
    let log = log.clone();
    let task_name = name.to_string();
    TaskDeclaration::function(name, move |_input: TaskInput| {
        log.record(&task_name);
        Ok(output.clone())
    })
}

/// Function task that sleeps for `millis` before completing.
pub fn slow_fn_task(name: &str, log: &ExecutionLog, millis: u64, output: Value) -> TaskDeclaration {
    let log = log.clone();
    let task_name = name.to_string();
    TaskDeclaration::function(name, move |_input: TaskInput| {
        std::thread::sleep(Duration::from_millis(millis));
        log.record(&task_name);
        Ok(output.clone())
    })
}

/// Function task that always fails with exit code `code`.
pub fn failing_fn_task(name: &str, log: &ExecutionLog, code: i32) -> TaskDeclaration {
    let log = log.clone();
    let task_name = name.to_string();
    TaskDeclaration::function(name, move |_input: TaskInput| {
        log.record(&task_name);
        Err(TaskFailure::new(code, "always fails"))
    })
}

/// Function task that captures the `params` it was invoked with.
pub fn capturing_fn_task(
    name: &str,
    seen: Arc<Mutex<Vec<Value>>>,
    output: Value,
) -> TaskDeclaration {
    TaskDeclaration::function(name, move |input: TaskInput| {
        seen.lock()
            .expect("captured params lock")
            .push(Value::Object(input.params.clone()));
        Ok(output.clone())
    })
}
