use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::transport::{MailProfile, MailTransport, TransportError, TransportFactory};

/// Process-local map from configuration id to a verified, pooled transport.
///
/// Owned by the application state rather than a global so every app instance
/// (and every test) gets its own. Nothing is shared across processes.
///
/// Entries are stamped with the configuration revision they were built from. A
/// lookup with a newer revision rebuilds, and a transport built from an older
/// revision never replaces a newer one, so a build that was in flight while the
/// configuration changed cannot bring the old credentials back.
///
/// Two sends racing on a cold entry may both build and verify a transport; the
/// first one inserted wins and the other is dropped.
pub struct TransporterCache {
    factory: Arc<dyn TransportFactory>,
    entries: DashMap<Uuid, CachedTransport>,
}

struct CachedTransport {
    revision: DateTime<Utc>,
    transport: Arc<dyn MailTransport>,
}

impl TransporterCache {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            entries: DashMap::new(),
        }
    }

    /// Cached transport for the profile, building and verifying one on a miss or
    /// when the cached one predates the profile's revision. A verification failure
    /// is returned as-is and nothing is cached.
    pub async fn get(&self, profile: &MailProfile) -> Result<Arc<dyn MailTransport>, TransportError> {
        if let Some(cached) = self.entries.get(&profile.id) {
            if cached.revision >= profile.revision {
                return Ok(cached.transport.clone());
            }
        }

        let transport = self.factory.build(profile)?;
        transport.verify().await?;

        match self.entries.entry(profile.id) {
            Entry::Occupied(entry) if entry.get().revision >= profile.revision => {
                Ok(entry.get().transport.clone())
            }
            Entry::Occupied(mut entry) => {
                tracing::debug!(config_id = %profile.id, host = %profile.host, "Transport rebuilt for new revision");
                entry.insert(CachedTransport {
                    revision: profile.revision,
                    transport: transport.clone(),
                });
                Ok(transport)
            }
            Entry::Vacant(entry) => {
                tracing::debug!(config_id = %profile.id, host = %profile.host, "Transport verified and cached");
                entry.insert(CachedTransport {
                    revision: profile.revision,
                    transport: transport.clone(),
                });
                Ok(transport)
            }
        }
    }

    /// Build a transport that bypasses the cache. Used for test sends against
    /// credentials that may be about to change.
    pub async fn connect_uncached(
        &self,
        profile: &MailProfile,
    ) -> Result<Arc<dyn MailTransport>, TransportError> {
        let transport = self.factory.build(profile)?;
        transport.verify().await?;
        Ok(transport)
    }

    /// Drop the transport for one configuration. Its pool closes once in-flight sends release it.
    pub fn invalidate(&self, config_id: Uuid) {
        if self.entries.remove(&config_id).is_some() {
            tracing::debug!(%config_id, "Transport evicted");
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    pub fn contains(&self, config_id: Uuid) -> bool {
        self.entries.contains_key(&config_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
