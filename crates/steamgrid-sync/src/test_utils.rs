//! Scriptable in-memory backend for adapter tests.

use crate::{RemoteEvent, SyncBackend, SyncError, SyncRequest};

/// A backend double: records every request, optionally rejects them all,
/// and hands out queued broadcast events on poll.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    /// When set, every request is rejected with this reason.
    pub reject: Option<String>,
    /// Every request made, in order.
    pub requests: Vec<SyncRequest>,
    /// Broadcast events delivered by the next poll.
    pub incoming: Vec<RemoteEvent>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncBackend for ScriptedBackend {
    fn request(&mut self, request: &SyncRequest) -> Result<(), SyncError> {
        self.requests.push(request.clone());
        match &self.reject {
            Some(reason) => Err(SyncError::Rejected {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn poll(&mut self) -> Vec<RemoteEvent> {
        std::mem::take(&mut self.incoming)
    }
}
