//! Core logic of the relay: conversation storage, the model client and
//! the streaming exchange between them.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod conversation;
mod model_client;
mod relay;
mod store;

pub use model_client::{CompletionStream, ModelClient, ModelError};
pub use relay::{CompletionRelay, Exchange, RelayEvent};
pub use store::{ConversationCell, ConversationMap, ConversationStore, StoreError};
