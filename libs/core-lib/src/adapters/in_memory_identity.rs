use async_trait::async_trait;
use tokio::sync::watch;

use crate::{CoreError, IdentityProvider, Principal};

/// In-memory implementation of the IdentityProvider port. The watch channel
/// always holds the current principal; tests and the worker drive sign-in
/// directly.
#[derive(Debug, Clone)]
pub struct InMemoryIdentity {
    tx: watch::Sender<Option<Principal>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, principal: Principal) {
        let _ = self.tx.send(Some(principal));
    }
}

impl Default for InMemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    fn principal(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }

    async fn sign_out(&self) -> Result<(), CoreError> {
        let _ = self.tx.send(None);
        Ok(())
    }
}
