use crate::models::OwnerId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("sign-out failed: {0}")]
    SignOut(String),
}

/// The authentication collaborator. The sync layer only reads who is signed
/// in and asks to sign out; everything else about auth lives elsewhere.
#[async_trait(?Send)]
pub trait Session {
    /// `None` until authentication completes.
    fn current_owner(&self) -> Option<OwnerId>;

    async fn sign_out(&self) -> Result<(), SessionError>;
}
