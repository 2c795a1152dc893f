//! User confirmation for the platform authenticator

use async_trait::async_trait;

use crate::screenlock::store::SignatureHandle;

/// What the user is asked to confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPurpose {
    Register,
    Sign,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Confirmed,
    /// Dismissed by the user
    Cancelled,
    /// Verification failed (wrong biometric, lockout)
    Failed,
}

#[derive(Debug)]
pub struct PromptRequest<'a> {
    pub purpose: PromptPurpose,
    pub rp_id: &'a str,
    /// Key the confirmation unlocks; `None` when no local key matched
    pub handle: Option<&'a SignatureHandle>,
}

/// Device-lock prompt (biometric or screen lock credential)
#[async_trait]
pub trait UserPrompt: Send + Sync {
    /// Whether the device has a secure lock the prompt can verify against
    fn is_device_secure(&self) -> bool;

    async fn prompt(&self, request: PromptRequest<'_>) -> PromptOutcome;

    /// Close a pending prompt
    fn dismiss(&self) {}
}
