use std::sync::Arc;

use chat_relay_core::{CompletionRelay, ConversationStore, ModelClient};

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub(crate) relay: CompletionRelay,
    pub(crate) upstream_url: Arc<str>,
}

impl AppState {
    /// Creates the state with a fresh, empty conversation store.
    pub fn new(model_client: ModelClient, upstream_url: impl Into<Arc<str>>) -> Self {
        Self::with_store(Arc::new(ConversationStore::new()), model_client, upstream_url)
    }

    /// Creates the state over an existing store.
    pub fn with_store(
        store: Arc<ConversationStore>,
        model_client: ModelClient,
        upstream_url: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            relay: CompletionRelay::new(store, model_client),
            upstream_url: upstream_url.into(),
        }
    }

    /// Returns the conversation store.
    #[inline]
    pub fn store(&self) -> &Arc<ConversationStore> {
        self.relay.store()
    }
}
