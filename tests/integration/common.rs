//! Shared test doubles for the pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use consulta::{
    Config, Identity, ModelError, ModelService, Orchestrator, Origin, PipelineRequest,
    PipelineResponse,
};

/// Model double with scripted replies, consumed in order. An exhausted
/// script (or an explicit `None` entry) fails the call, which the
/// pipeline must absorb as degradation, never a panic.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Option<String>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Option<&str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Always-failing model, for paths that must work without one.
    pub fn unavailable() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .expect("script lock")
            .pop_front()
            .flatten();
        next.ok_or(ModelError::Timeout)
    }
}

pub fn request(query: &str, origin: Origin, role: &str) -> PipelineRequest {
    PipelineRequest {
        query: query.to_string(),
        origin,
        identity: Identity {
            user_id: Some("u-1".to_string()),
            user_name: Some("Prueba".to_string()),
            role: role.to_string(),
        },
    }
}

pub async fn run(
    model: Arc<ScriptedModel>,
    store: Arc<consulta::MemoryStore>,
    req: PipelineRequest,
) -> PipelineResponse {
    let orchestrator = Orchestrator::new(&Config::default(), model, store);
    orchestrator.handle(req).await
}
