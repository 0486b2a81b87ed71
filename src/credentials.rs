use crate::error::{PipelineError, PipelineResult};
use std::fmt;
use std::sync::Arc;

/// An opaque model API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// One pool position: its credential and the client bound to it.
pub struct Slot<C: ?Sized> {
    pub index: usize,
    pub credential: Credential,
    pub client: Arc<C>,
}

/// Fixed, ordered set of credentials with their clients. Work item `i` always
/// lands on slot `i mod N`; there is no health-based exclusion, so a revoked
/// key keeps receiving (and failing) its share while the other slots proceed.
pub struct CredentialPool<C: ?Sized> {
    slots: Vec<Slot<C>>,
}

impl<C: ?Sized> CredentialPool<C> {
    /// Binds each credential to a client built by `make_client`.
    pub fn build<F>(credentials: Vec<Credential>, mut make_client: F) -> PipelineResult<Self>
    where
        F: FnMut(&Credential) -> anyhow::Result<Arc<C>>,
    {
        if credentials.is_empty() {
            return Err(PipelineError::Config(
                "credential pool needs at least one API key".into(),
            ));
        }
        let slots = credentials
            .into_iter()
            .enumerate()
            .map(|(index, credential)| {
                let client = make_client(&credential)?;
                Ok(Slot {
                    index,
                    credential,
                    client,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Round-robin assignment for work item `i`.
    pub fn slot(&self, i: usize) -> &Slot<C> {
        &self.slots[i % self.slots.len()]
    }
}
