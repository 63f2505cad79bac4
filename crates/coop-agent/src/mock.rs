//! Scripted gateway for tests
//!
//! Replies are queued per role. When a role's queue is empty the sticky reply
//! set with [`ScriptedGateway::always`] is used, and failing that a fixed
//! `"<Role> output"` string, so unscripted runs stay deterministic.

use crate::gateway::Gateway;
use async_trait::async_trait;
use coop_core::{ChatMessage, CoopError, Result, Role, RoleConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unavailable,
    Fail(String),
}

/// A call the gateway received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: Role,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
pub struct ScriptedGateway {
    queued: Mutex<HashMap<Role, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<Role, Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for the next call from `role`
    pub fn push(&self, role: Role, text: impl Into<String>) -> &Self {
        self.enqueue(role, Reply::Text(text.into()))
    }

    /// Queue a model-unavailable failure
    pub fn push_unavailable(&self, role: Role) -> &Self {
        self.enqueue(role, Reply::Unavailable)
    }

    /// Queue a transient gateway failure
    pub fn push_error(&self, role: Role, message: impl Into<String>) -> &Self {
        self.enqueue(role, Reply::Fail(message.into()))
    }

    /// Reply used whenever `role` has nothing queued
    pub fn always(&self, role: Role, text: impl Into<String>) -> &Self {
        lock(&self.sticky).insert(role, Reply::Text(text.into()));
        self
    }

    /// Make every unqueued call from `role` report the model as unavailable
    pub fn always_unavailable(&self, role: Role) -> &Self {
        lock(&self.sticky).insert(role, Reply::Unavailable);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, role: Role) -> usize {
        lock(&self.calls).iter().filter(|c| c.role == role).count()
    }

    fn enqueue(&self, role: Role, reply: Reply) -> &Self {
        lock(&self.queued).entry(role).or_default().push_back(reply);
        self
    }

    fn next_reply(&self, role: Role) -> Reply {
        if let Some(reply) = lock(&self.queued).get_mut(&role).and_then(|q| q.pop_front()) {
            return reply;
        }
        lock(&self.sticky)
            .get(&role)
            .cloned()
            .unwrap_or_else(|| Reply::Text(format!("{} output", role)))
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn generate(&self, role: &RoleConfig, messages: &[ChatMessage]) -> Result<String> {
        lock(&self.calls).push(RecordedCall {
            role: role.role,
            model: role.model.clone(),
            messages: messages.to_vec(),
        });

        match self.next_reply(role.role) {
            Reply::Text(text) => Ok(text),
            Reply::Unavailable => Err(CoopError::ModelUnavailable {
                model: role.model.clone(),
                role: role.role.to_string(),
            }),
            Reply::Fail(message) => Err(CoopError::Gateway(message)),
        }
    }
}
