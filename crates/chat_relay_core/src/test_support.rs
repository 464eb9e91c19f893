//! Scripted `CompletionService` used by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::Turn;
use crate::ports::{CompletionService, PortError, PortResult};

pub(crate) fn failure(message: &str) -> PortResult<Turn> {
    Err(PortError::Unexpected(message.to_string()))
}

/// Replays scripted results in order, then echoes the last message.
pub(crate) struct ScriptedCompletion {
    script: Mutex<VecDeque<PortResult<Turn>>>,
    contexts: Mutex<Vec<Vec<Turn>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedCompletion {
    pub(crate) fn echo() -> Self {
        Self::with_script(Vec::new())
    }

    pub(crate) fn with_script(script: Vec<PortResult<Turn>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            contexts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_context(&self) -> Option<Vec<Turn>> {
        self.contexts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, history: &[Turn]) -> PortResult<Turn> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(history.to_vec());
        let scripted = self.script.lock().unwrap().pop_front();

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        scripted.unwrap_or_else(|| {
            let last = history.last().map(|t| t.content.as_str()).unwrap_or_default();
            Ok(Turn::assistant(format!("echo: {last}")))
        })
    }
}
