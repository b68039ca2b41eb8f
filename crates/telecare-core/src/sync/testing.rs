//! Scripted transport for dispatcher and engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{SyncAck, SyncError, SyncRequest, SyncTransport};

type Reply = Result<SyncAck, SyncError>;

/// Answers from a script, then from a fallback, and records every call.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<SyncError>,
    calls: Mutex<Vec<SyncRequest>>,
    delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedTransport {
    /// Accepts everything, assigning `srv-<record id>`.
    pub fn accepting() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
            delay: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Fails every call that is not scripted.
    pub fn failing(error: SyncError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::accepting()
        }
    }

    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SyncRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn send(&self, request: &SyncRequest) -> Reply {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let reply = scripted.unwrap_or_else(|| match &self.fallback {
            Some(error) => Err(error.clone()),
            None => Ok(SyncAck {
                server_id: Some(format!("srv-{}", request.record.id)),
                status: Some("created".to_string()),
            }),
        });

        self.active.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
