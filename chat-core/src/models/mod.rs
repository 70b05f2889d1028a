//! Domain models shared across the chat services.

pub mod conversation;
pub mod events;
pub mod memory;
pub mod profile;

pub use conversation::{Conversation, ConversationMeta, StoredMessage};
pub use events::{CompletionEvent, TokenFragment, TokenPayload, UserMessageEnvelope};
pub use memory::{ConversationSummary, Sentiment, SummarySearchResult};
pub use profile::{ProfileUpdates, UserProfile};
