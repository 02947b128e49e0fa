//! # Deprecation Registry
//!
//! Deprecated operations are declared here and consulted by ingress
//! adapters, which record usage and attach warning headers in their
//! response mapping. Call targets are never rewritten at runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// One deprecation declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecationNotice {
    /// Version the deprecation was announced in.
    pub since: String,
    /// What callers should use instead.
    pub replacement: String,
}

/// The declarative registry of deprecated operations.
#[derive(Debug, Default)]
pub struct DeprecationRegistry {
    notices: HashMap<String, DeprecationNotice>,
    usage: RwLock<HashMap<String, AtomicU64>>,
}

impl DeprecationRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an operation deprecated.
    #[must_use]
    pub fn deprecate(
        mut self,
        operation: impl Into<String>,
        since: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        self.notices.insert(
            operation.into(),
            DeprecationNotice {
                since: since.into(),
                replacement: replacement.into(),
            },
        );
        self
    }

    /// Consulted by the ingress adapter per call: returns the notice (for
    /// the warning header) and counts the use.
    #[must_use]
    pub fn record_use(&self, operation: &str) -> Option<&DeprecationNotice> {
        let notice = self.notices.get(operation)?;
        if let Ok(usage) = self.usage.read() {
            if let Some(counter) = usage.get(operation) {
                counter.fetch_add(1, Ordering::Relaxed);
                return Some(notice);
            }
        }
        if let Ok(mut usage) = self.usage.write() {
            usage
                .entry(operation.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        Some(notice)
    }

    /// How often a deprecated operation was still called.
    #[must_use]
    pub fn usage_count(&self, operation: &str) -> u64 {
        self.usage
            .read()
            .ok()
            .and_then(|usage| usage.get(operation).map(|c| c.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }
}
