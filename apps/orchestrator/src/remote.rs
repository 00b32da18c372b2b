use std::collections::HashMap;

use worldbus::topic::AiRequest;
use worldbus::user::UserId;

use crate::rooms::Direction;

/// Total tries for a custom action whose reply carries no verdict.
pub const MAX_CUSTOM_ATTEMPTS: u32 = 3;

/// What to do when the answer to a request arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingKind {
    /// Reduce free text to a known command; on a miss the input runs as a custom action.
    Translate { input: String },
    CustomAction { action: String, attempt: u32 },
    /// `build` without a description; the answer becomes the new room's description.
    RoomDescription {
        from_room: String,
        direction: Direction,
        room_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub user_id: UserId,
    pub kind: PendingKind,
    pub prompt: String,
    pub system_message: String,
    pub issued_ms: u64,
}

/// In-flight AI requests keyed by request id. Each entry is consumed at most once.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, PendingRequest>,
    seq: u64,
}

impl Correlator {
    /// Record a request and return the `ai_request` body to publish.
    pub fn submit(
        &mut self,
        user_id: &UserId,
        kind: PendingKind,
        prompt: String,
        system_message: String,
        now_ms: u64,
    ) -> AiRequest {
        self.seq = self.seq.saturating_add(1);
        let request_id = format!("{user_id}-{now_ms}-{}", self.seq);
        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                user_id: user_id.clone(),
                kind,
                prompt: prompt.clone(),
                system_message: system_message.clone(),
                issued_ms: now_ms,
            },
        );
        AiRequest {
            prompt,
            request_id,
            system_message,
        }
    }

    pub fn take(&mut self, request_id: &str) -> Option<PendingRequest> {
        self.pending.remove(request_id)
    }

    #[cfg(test)]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn pending_for(&self, user_id: &UserId) -> usize {
        self.pending
            .values()
            .filter(|p| &p.user_id == user_id)
            .count()
    }
}
