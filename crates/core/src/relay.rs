
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use chat_relay_model::ModelRequest;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;

use crate::conversation::{Message, Role};
use crate::model_client::{CompletionStream, ModelClient};
use crate::store::{ConversationStore, StoreError};

/// An event of a streaming exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RelayEvent {
    /// A content increment, forwarded as received.
    Content(String),
    /// The response completed and was stored. Terminal.
    Done,
    /// The exchange failed and nothing was stored for the response.
    /// Terminal.
    Error(String),
}

impl RelayEvent {
    /// Returns `true` if no event follows this one.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Content(_))
    }
}

/// Bridges a conversation and the model: appends the user message,
/// streams the model response back as [`RelayEvent`]s and stores the
/// complete response.
#[derive(Clone)]
pub struct CompletionRelay {
    store: Arc<ConversationStore>,
    model_client: ModelClient,
}

impl CompletionRelay {
    /// Creates a relay over the given store and model client.
    #[inline]
    pub fn new(store: Arc<ConversationStore>, model_client: ModelClient) -> Self {
        Self {
            store,
            model_client,
        }
    }

    /// Returns the store this relay writes to.
    #[inline]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Returns the model client this relay reads from.
    #[inline]
    pub fn model_client(&self) -> &ModelClient {
        &self.model_client
    }

    /// Starts an exchange in the conversation.
    ///
    /// Waits for any exchange already running in the same conversation,
    /// then appends the user message and returns the event stream. The
    /// whole history, including the new message, is sent to the model.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] before any event is produced if
    /// the conversation does not exist.
    pub async fn stream_exchange(
        &self,
        conversation_id: &str,
        user_text: impl Into<String>,
    ) -> Result<Exchange, StoreError> {
        let exchange_lock = self.store.exchange_lock(conversation_id)?;
        let guard = exchange_lock.lock_owned().await;

        self.store.append_message(
            conversation_id,
            Role::User,
            user_text,
            Some(Utc::now()),
        )?;
        let history = self.store.get(conversation_id)?.messages;
        debug!(
            "starting exchange in {conversation_id} with {} messages",
            history.len()
        );

        let request = ModelRequest {
            messages: history.iter().map(Message::to_model_message).collect(),
        };
        let upstream = self.model_client.stream_completion(request);
        let state = ExchangeState {
            store: Arc::clone(&self.store),
            conversation_id: conversation_id.to_owned(),
            upstream,
            accumulated: String::new(),
            _guard: guard,
        };
        Ok(Exchange::new(state))
    }
}

struct ExchangeState {
    store: Arc<ConversationStore>,
    conversation_id: String,
    upstream: CompletionStream,
    // Never written to the store before the upstream completes.
    accumulated: String,
    _guard: OwnedMutexGuard<()>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = (RelayEvent, Option<ExchangeState>);

/// The event stream of one exchange.
///
/// Yields content events followed by exactly one terminal event, then
/// ends. Dropping it before the terminal event cancels the exchange:
/// the upstream request is dropped and no assistant message is stored.
pub struct Exchange {
    conversation_id: String,
    next_event_fut: Option<PinnedFuture<NextEvent>>,
}

impl Exchange {
    fn new(state: ExchangeState) -> Self {
        Self {
            conversation_id: state.conversation_id.clone(),
            next_event_fut: Some(Box::pin(next_event(state))),
        }
    }

    /// Returns the conversation this exchange belongs to.
    #[inline]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Stream for Exchange {
    type Item = RelayEvent;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(next_event_fut) = &mut this.next_event_fut else {
            return Poll::Ready(None);
        };
        let (event, state) = ready!(next_event_fut.as_mut().poll(cx));

        // Only a content event leaves the state behind, so nothing can
        // follow a terminal event.
        this.next_event_fut = state
            .map(|state| Box::pin(next_event(state)) as PinnedFuture<NextEvent>);
        Poll::Ready(Some(event))
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if self.next_event_fut.is_some() {
            info!(
                "exchange in {} cancelled, discarding the partial response",
                self.conversation_id
            );
        }
    }
}

async fn next_event(mut state: ExchangeState) -> NextEvent {
    match state.upstream.next().await {
        Some(Ok(delta)) => {
            state.accumulated.push_str(&delta);
            (RelayEvent::Content(delta), Some(state))
        }
        Some(Err(err)) => {
            warn!(
                "exchange in {} failed after {} bytes: {err}",
                state.conversation_id,
                state.accumulated.len()
            );
            (RelayEvent::Error(err.to_string()), None)
        }
        None => (finish(state), None),
    }
}

fn finish(state: ExchangeState) -> RelayEvent {
    let ExchangeState {
        store,
        conversation_id,
        accumulated,
        ..
    } = state;
    let len = accumulated.len();
    match store.append_message(
        &conversation_id,
        Role::Assistant,
        accumulated,
        Some(Utc::now()),
    ) {
        Ok(()) => {
            debug!("exchange in {conversation_id} completed with {len} bytes");
            RelayEvent::Done
        }
        Err(err) => {
            warn!("could not store the response: {err}");
            RelayEvent::Error(err.to_string())
        }
    }
}
