use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::conversation::{Conversation, ConversationSummary, Message, Role};

/// Error type for [`ConversationStore`] operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(String),
}

/// A stored conversation together with its exchange lock.
///
/// The state lock is only held for the duration of a single store
/// operation. The exchange lock is held by the relay for a whole
/// exchange, so that exchanges against one conversation never
/// interleave their appends.
pub struct ConversationCell {
    state: Mutex<Conversation>,
    exchange: Arc<tokio::sync::Mutex<()>>,
}

impl ConversationCell {
    fn new(conversation: Conversation) -> Self {
        Self {
            state: Mutex::new(conversation),
            exchange: Default::default(),
        }
    }

    #[inline]
    fn state(&self) -> MutexGuard<'_, Conversation> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The mapping that backs a [`ConversationStore`].
///
/// Implemented for `HashMap` and `BTreeMap`; any keyed container works.
pub trait ConversationMap: Send + Sync {
    /// Returns the cell stored under `id`.
    fn get(&self, id: &str) -> Option<Arc<ConversationCell>>;

    /// Stores a cell under `id`.
    fn insert(&mut self, id: String, cell: Arc<ConversationCell>);

    /// Removes and returns the cell stored under `id`.
    fn remove(&mut self, id: &str) -> Option<Arc<ConversationCell>>;

    /// Returns the number of stored cells.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every stored cell.
    fn cells(&self) -> Vec<Arc<ConversationCell>>;
}

macro_rules! impl_conversation_map {
    ($($map:ident),*) => {$(
        impl ConversationMap for $map<String, Arc<ConversationCell>> {
            #[inline]
            fn get(&self, id: &str) -> Option<Arc<ConversationCell>> {
                $map::get(self, id).cloned()
            }

            #[inline]
            fn insert(&mut self, id: String, cell: Arc<ConversationCell>) {
                $map::insert(self, id, cell);
            }

            #[inline]
            fn remove(&mut self, id: &str) -> Option<Arc<ConversationCell>> {
                $map::remove(self, id)
            }

            #[inline]
            fn len(&self) -> usize {
                $map::len(self)
            }

            #[inline]
            fn cells(&self) -> Vec<Arc<ConversationCell>> {
                self.values().cloned().collect()
            }
        }
    )*};
}

impl_conversation_map!(HashMap, BTreeMap);

/// Process-wide, in-memory conversation storage.
///
/// All operations are synchronous. Create one store per process and
/// share it by reference (usually through an `Arc`).
pub struct ConversationStore {
    map: RwLock<Box<dyn ConversationMap>>,
}

impl Default for ConversationStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty store backed by a `HashMap`.
    #[inline]
    pub fn new() -> Self {
        Self::with_map(HashMap::new())
    }

    /// Creates a store backed by the given mapping.
    #[inline]
    pub fn with_map<M: ConversationMap + 'static>(map: M) -> Self {
        Self {
            map: RwLock::new(Box::new(map)),
        }
    }

    /// Creates a conversation.
    ///
    /// Without a title (or with an empty one), the conversation is named
    /// `Chat N` and renamed after its first message.
    pub fn create(&self, title: Option<String>) -> ConversationSummary {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        let id = Uuid::new_v4().to_string();
        let conversation = match title.filter(|title| !title.is_empty()) {
            Some(title) => Conversation::new(id.clone(), title, true),
            None => {
                let title = format!("Chat {}", map.len() + 1);
                Conversation::new(id.clone(), title, false)
            }
        };
        let summary = conversation.summary();
        map.insert(id, Arc::new(ConversationCell::new(conversation)));
        debug!("created conversation {}", summary.id);
        summary
    }

    /// Lists all conversations, oldest first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let cells = self.read_cells();
        let mut summaries: Vec<_> =
            cells.iter().map(|cell| cell.state().summary()).collect();
        summaries.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    /// Returns a snapshot of the conversation.
    pub fn get(&self, id: &str) -> Result<Conversation, StoreError> {
        Ok(self.cell(id)?.state().clone())
    }

    /// Deletes the conversation.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        debug!("deleted conversation {id}");
        Ok(())
    }

    /// Appends a message to the conversation.
    ///
    /// The first message of a conversation without an explicit title
    /// also renames it.
    pub fn append_message(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let cell = self.cell(id)?;
        cell.state().push(Message {
            role,
            content: content.into(),
            timestamp,
        });
        trace!("appended a {role:?} message to {id}");
        Ok(())
    }

    /// Returns the number of stored conversations.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no conversation is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn exchange_lock(
        &self,
        id: &str,
    ) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        Ok(Arc::clone(&self.cell(id)?.exchange))
    }

    fn cell(&self, id: &str) -> Result<Arc<ConversationCell>, StoreError> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    fn read_cells(&self) -> Vec<Arc<ConversationCell>> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cells()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_user(store: &ConversationStore, id: &str, content: &str) {
        store
            .append_message(id, Role::User, content, Some(Utc::now()))
            .unwrap();
    }

    #[test]
    fn test_create_default_titles() {
        let store = ConversationStore::new();
        let first = store.create(None);
        let second = store.create(Some(String::new()));
        let named = store.create(Some("Trip planning".to_owned()));

        assert_eq!(first.title, "Chat 1");
        assert_eq!(second.title, "Chat 2");
        assert_eq!(named.title, "Trip planning");
        assert_eq!(first.message_count, 0);
        assert_ne!(first.id, second.id);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_title_from_first_message() {
        let store = ConversationStore::new();
        let id = store.create(None).id;
        let long = "Explain how a B-tree keeps itself balanced during inserts";
        append_user(&store, &id, long);
        append_user(&store, &id, "And deletes?");

        let conversation = store.get(&id).unwrap();
        assert_eq!(
            conversation.title,
            "Explain how a B-tree keeps itself balanced during ..."
        );
        assert_eq!(conversation.title.chars().count(), 53);
    }

    #[test]
    fn test_explicit_title_is_kept() {
        let store = ConversationStore::new();
        let id = store.create(Some("Rust questions".to_owned())).id;
        append_user(&store, &id, "What is a lifetime?");
        let conversation = store.get(&id).unwrap();
        assert!(conversation.has_explicit_title());
        assert_eq!(conversation.title, "Rust questions");

        // A blank title is no title at all.
        let blank = store.create(Some(String::new())).id;
        assert!(!store.get(&blank).unwrap().has_explicit_title());
    }

    #[test]
    fn test_message_count_and_order() {
        let store = ConversationStore::new();
        let id = store.create(None).id;
        let contents = ["one", "two", "", "four"];
        for (idx, content) in contents.iter().enumerate() {
            let role = if idx % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_message(&id, role, *content, None).unwrap();
        }

        let summary = store.list().into_iter().find(|s| s.id == id).unwrap();
        assert_eq!(summary.message_count, contents.len());

        let messages = store.get(&id).unwrap().messages;
        let stored: Vec<_> =
            messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(stored, contents);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_not_found() {
        let store = ConversationStore::new();
        let missing = "00000000-0000-0000-0000-000000000000";
        assert_eq!(
            store.get(missing).unwrap_err(),
            StoreError::NotFound(missing.to_owned())
        );
        assert!(store.delete(missing).is_err());
        assert!(
            store
                .append_message(missing, Role::User, "hi", None)
                .is_err()
        );
    }

    #[test]
    fn test_delete() {
        let store = ConversationStore::with_map(BTreeMap::new());
        let kept = store.create(None).id;
        let deleted = store.create(None).id;

        store.delete(&deleted).unwrap();
        assert!(matches!(store.get(&deleted), Err(StoreError::NotFound(_))));
        assert!(store.delete(&deleted).is_err());

        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![kept]);
    }

    #[test]
    fn test_list_is_stable() {
        let store = ConversationStore::new();
        for _ in 0..8 {
            store.create(None);
        }
        assert_eq!(store.list(), store.list());
    }
}
