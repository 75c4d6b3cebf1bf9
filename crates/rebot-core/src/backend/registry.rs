//! Per-identity backend cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{BackendError, BackendProvider, ConversationBackend};
use crate::session::SessionId;

/// Default cap on cached conversations.
pub const DEFAULT_MAX_IDENTITIES: usize = 1000;

/// Default time an unused conversation is kept after its last connection.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Builds a fresh backend for an identity seen for the first time.
pub type BackendFactory =
    dyn Fn(&SessionId) -> Result<Arc<dyn ConversationBackend>, BackendError> + Send + Sync;

/// Bounds on what a [`BackendRegistry`] keeps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryLimits {
    /// Most identities cached at once. Binding a new identity past this
    /// evicts the least recently used one, preferring backends with no open
    /// connection.
    pub max_identities: usize,

    /// Backends with no open connection are dropped once unused this long.
    pub idle_ttl: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_identities: DEFAULT_MAX_IDENTITIES,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

struct CachedBackend {
    backend: Arc<dyn ConversationBackend>,
    last_used: Instant,
}

impl CachedBackend {
    /// Sessions hold the other references.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.backend) > 1
    }
}

/// Hands out one backend per identity and keeps it for later connections.
///
/// Reconnecting with the same identity binds to the same backend, so its
/// in-process history survives the reconnect (but not a restart, and not
/// an eviction).
pub struct BackendRegistry {
    factory: Box<BackendFactory>,
    limits: RegistryLimits,
    backends: Mutex<HashMap<SessionId, CachedBackend>>,
}

impl BackendRegistry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&SessionId) -> Result<Arc<dyn ConversationBackend>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            factory: Box::new(factory),
            limits: RegistryLimits::default(),
            backends: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_limits(mut self, limits: RegistryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> RegistryLimits {
        self.limits
    }

    /// Number of identities with a cached backend.
    pub fn len(&self) -> usize {
        self.backends.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_idle(&self, backends: &mut HashMap<SessionId, CachedBackend>, now: Instant) {
        backends.retain(|identity, cached| {
            let keep =
                cached.in_use() || now.duration_since(cached.last_used) < self.limits.idle_ttl;
            if !keep {
                log::debug!("Evicting idle backend for {}", identity);
            }
            keep
        });
    }

    fn evict_least_recent(&self, backends: &mut HashMap<SessionId, CachedBackend>) -> bool {
        let victim = backends
            .iter()
            .min_by_key(|(_, cached)| (cached.in_use(), cached.last_used))
            .map(|(identity, _)| identity.clone());

        match victim {
            Some(identity) => {
                log::info!(
                    "Conversation cache full ({}), evicting backend for {}",
                    self.limits.max_identities,
                    identity
                );
                backends.remove(&identity);
                true
            }
            None => false,
        }
    }
}

impl BackendProvider for BackendRegistry {
    fn bind(&self, identity: &SessionId) -> Result<Arc<dyn ConversationBackend>, BackendError> {
        let now = Instant::now();
        let mut backends = self.backends.lock().map_err(|_| BackendError::Poisoned)?;

        if let Some(cached) = backends.get_mut(identity) {
            log::debug!("Reusing backend for {}", identity);
            cached.last_used = now;
            return Ok(Arc::clone(&cached.backend));
        }

        self.evict_idle(&mut backends, now);
        while backends.len() >= self.limits.max_identities.max(1) {
            if !self.evict_least_recent(&mut backends) {
                break;
            }
        }

        let backend = (self.factory)(identity)?;
        backends.insert(
            identity.clone(),
            CachedBackend {
                backend: Arc::clone(&backend),
                last_used: now,
            },
        );
        log::debug!("Created backend for {}", identity);
        Ok(backend)
    }

    fn release(&self, identity: &SessionId) {
        let now = Instant::now();
        let Ok(mut backends) = self.backends.lock() else {
            return;
        };
        if let Some(cached) = backends.get_mut(identity) {
            cached.last_used = now;
        }
        self.evict_idle(&mut backends, now);
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("identities", &self.len())
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_registry(created: Arc<AtomicUsize>) -> BackendRegistry {
        BackendRegistry::new(move |_| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(EchoBackend::new()) as Arc<dyn ConversationBackend>)
        })
    }

    fn id(name: &str) -> SessionId {
        SessionId(name.to_string())
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        assert!(registry.is_empty());
        assert_eq!(registry.limits(), RegistryLimits::default());
    }

    #[test]
    fn same_identity_binds_same_backend() {
        let created = Arc::new(AtomicUsize::new(0));
        let registry = echo_registry(Arc::clone(&created));

        let first = registry.bind(&id("user-1")).unwrap();
        first.reply("hello").unwrap();
        let second = registry.bind(&id("user-1")).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(second.history().unwrap().len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn identities_are_isolated() {
        let registry = echo_registry(Arc::new(AtomicUsize::new(0)));
        let alice = registry.bind(&id("alice")).unwrap();
        let bob = registry.bind(&id("bob")).unwrap();

        alice.reply("hi").unwrap();

        assert_eq!(alice.history().unwrap().len(), 2);
        assert!(bob.history().unwrap().is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn factory_error_is_not_cached() {
        let registry = BackendRegistry::new(|_| {
            Err(BackendError::Unavailable("no model configured".to_string()))
        });

        assert!(matches!(
            registry.bind(&id("user-1")),
            Err(BackendError::Unavailable(_))
        ));
        assert!(registry.is_empty());
    }

    mod eviction {
        use super::*;

        #[test]
        fn capacity_is_never_exceeded() {
            let registry =
                echo_registry(Arc::new(AtomicUsize::new(0))).with_limits(RegistryLimits {
                    max_identities: 3,
                    idle_ttl: DEFAULT_IDLE_TTL,
                });

            for i in 0..50 {
                let identity = id(&format!("room-{i}"));
                drop(registry.bind(&identity).unwrap());
                registry.release(&identity);
            }
            assert_eq!(registry.len(), 3);
        }

        #[test]
        fn least_recently_used_idle_backend_goes_first() {
            let created = Arc::new(AtomicUsize::new(0));
            let registry = echo_registry(Arc::clone(&created)).with_limits(RegistryLimits {
                max_identities: 2,
                idle_ttl: DEFAULT_IDLE_TTL,
            });

            registry.bind(&id("old")).unwrap().reply("hi").unwrap();
            std::thread::sleep(Duration::from_millis(5));
            registry.bind(&id("recent")).unwrap().reply("hi").unwrap();
            std::thread::sleep(Duration::from_millis(5));
            registry.bind(&id("new")).unwrap();

            // "recent" kept its history, "old" starts over
            assert_eq!(registry.bind(&id("recent")).unwrap().history().unwrap().len(), 2);
            assert!(registry.bind(&id("old")).unwrap().history().unwrap().is_empty());
            assert_eq!(created.load(Ordering::SeqCst), 4);
        }

        #[test]
        fn backends_in_use_are_evicted_last() {
            let registry =
                echo_registry(Arc::new(AtomicUsize::new(0))).with_limits(RegistryLimits {
                    max_identities: 2,
                    idle_ttl: DEFAULT_IDLE_TTL,
                });

            let held = registry.bind(&id("connected")).unwrap();
            held.reply("hi").unwrap();
            std::thread::sleep(Duration::from_millis(5));
            registry.bind(&id("idle")).unwrap();
            registry.bind(&id("newcomer")).unwrap();

            let again = registry.bind(&id("connected")).unwrap();
            assert!(Arc::ptr_eq(&held, &again));
        }

        #[test]
        fn released_backend_expires_after_ttl() {
            let registry =
                echo_registry(Arc::new(AtomicUsize::new(0))).with_limits(RegistryLimits {
                    max_identities: DEFAULT_MAX_IDENTITIES,
                    idle_ttl: Duration::ZERO,
                });

            let backend = registry.bind(&id("user-1")).unwrap();
            registry.release(&id("other"));
            assert_eq!(registry.len(), 1, "open connection keeps its backend");

            drop(backend);
            registry.release(&id("user-1"));
            assert!(registry.is_empty());
        }

        #[test]
        fn release_refreshes_idle_clock() {
            let registry =
                echo_registry(Arc::new(AtomicUsize::new(0))).with_limits(RegistryLimits {
                    max_identities: DEFAULT_MAX_IDENTITIES,
                    idle_ttl: Duration::from_secs(60),
                });

            drop(registry.bind(&id("user-1")).unwrap());
            registry.release(&id("user-1"));
            registry.bind(&id("user-2")).unwrap();
            assert_eq!(registry.len(), 2);
        }
    }
}
