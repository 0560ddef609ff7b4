//! Session scoping.
//!
//! A session binds one [`Container`] to one owning entity. Exactly one session
//! is live at a time; the orchestrator creates it once the owner becomes
//! observable and disposes it when the owner goes away or the host shuts down.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::container::Container;
use crate::error::ContainerError;

/// Opaque host identifier of the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// Owner-readiness signal supplied by the host.
pub trait OwnerSignal: Send + Sync {
    /// The owning entity, if one is currently observable.
    fn current_owner(&self) -> Option<OwnerId>;
}

/// One live session: an owner plus its service container.
pub struct SessionContext {
    id: Uuid,
    owner: OwnerId,
    container: Arc<Container>,
    created_at: DateTime<Utc>,
}

impl SessionContext {
    /// Build a session with a fresh container.
    ///
    /// The session and its owner id are registered in the container before
    /// this returns, so anything resolved afterwards can depend on them.
    pub fn new(owner: OwnerId) -> Result<Arc<Self>, ContainerError> {
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            owner,
            container: Arc::new(Container::new()),
            created_at: Utc::now(),
        });

        session.container.register(session.clone())?;
        session.container.register(Arc::new(owner))?;

        info!(session = %session.id, owner = %owner, "Session created");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_disposed(&self) -> bool {
        self.container.is_disposed()
    }

    /// Dispose the container. Idempotent.
    pub fn dispose(&self) {
        if self.container.is_disposed() {
            return;
        }
        self.container.dispose();
        info!(session = %self.id, owner = %self.owner, "Session disposed");
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("created_at", &self.created_at)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
