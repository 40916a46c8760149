//! Learning gate - controls whether new learning input is accepted
//!
//! An explicit instance owned by the host rather than a process-wide flag.
//! Producers and the drain loop read it concurrently, so the enabled flag
//! is atomic and the active provider sits behind a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Gate evaluated at enqueue time. A task already queued is always
/// processed even if learning is disabled afterwards.
pub struct LearningGate {
    enabled: AtomicBool,
    active_provider: RwLock<String>,
}

impl LearningGate {
    /// Create a gate with the given initial state
    pub fn new(enabled: bool, active_provider: impl Into<String>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            active_provider: RwLock::new(active_provider.into()),
        }
    }

    /// Whether learning is currently enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable learning
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The provider currently serving the session
    pub fn active_provider(&self) -> String {
        self.active_provider
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Record a provider switch
    pub fn set_active_provider(&self, provider: impl Into<String>) {
        if let Ok(mut active) = self.active_provider.write() {
            *active = provider.into();
        }
    }

    /// Gating predicate: learning is enabled and the active provider is
    /// not the one asking to learn from its own output.
    pub fn allows(&self, provider: &str) -> bool {
        self.is_enabled() && self.active_provider() != provider
    }
}
