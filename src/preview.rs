use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Revocable reference to locally captured media, shaped like a browser object URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreviewUrl(String);

impl PreviewUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PreviewUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    active: HashMap<PreviewUrl, Arc<[u8]>>,
}

/// Process-wide table of live preview references.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `payload` and return a handle that revokes it when dropped.
    pub fn create(&self, payload: Arc<[u8]>) -> PreviewHandle {
        let mut state = self.state.lock().expect("preview registry mutex poisoned");
        state.next_id += 1;
        let url = PreviewUrl(format!("blob:voicefeed/{}", state.next_id));
        state.active.insert(url.clone(), payload);
        tracing::trace!(%url, "preview created");
        PreviewHandle {
            url,
            registry: self.clone(),
        }
    }

    pub fn is_active(&self, url: &PreviewUrl) -> bool {
        let state = self.state.lock().expect("preview registry mutex poisoned");
        state.active.contains_key(url)
    }

    pub fn active_count(&self) -> usize {
        let state = self.state.lock().expect("preview registry mutex poisoned");
        state.active.len()
    }

    fn revoke(&self, url: &PreviewUrl) {
        let mut state = self.state.lock().expect("preview registry mutex poisoned");
        if state.active.remove(url).is_some() {
            tracing::trace!(%url, "preview revoked");
        }
    }
}

/// Owning side of a preview reference. Dropping it revokes the URL.
#[derive(Debug)]
pub struct PreviewHandle {
    url: PreviewUrl,
    registry: PreviewRegistry,
}

impl PreviewHandle {
    pub fn url(&self) -> &PreviewUrl {
        &self.url
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::PreviewRegistry;
    use std::sync::Arc;

    #[test]
    fn dropping_handle_revokes_url() {
        let registry = PreviewRegistry::new();
        let handle = registry.create(Arc::from(vec![1u8, 2, 3]));
        let url = handle.url().clone();

        assert!(registry.is_active(&url));

        drop(handle);
        assert!(!registry.is_active(&url));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn urls_are_unique() {
        let registry = PreviewRegistry::new();
        let first = registry.create(Arc::from(Vec::new()));
        let second = registry.create(Arc::from(Vec::new()));
        assert_ne!(first.url(), second.url());
        assert_eq!(registry.active_count(), 2);
    }
}
