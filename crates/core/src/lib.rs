//! # Shimeji Core
//!
//! Domain types, traits, and error definitions for the Shimeji chat gateway.
//! This crate defines the model the provider clients implement against:
//! conversations, streaming deltas, the canonical error taxonomy, and
//! agent gateway session identity.
//!
//! ## Design Philosophy
//!
//! Every backend is hidden behind the [`Provider`] trait defined here.
//! Implementations live in `shimeji-providers`. This enables:
//! - Swapping backends per conversation without touching callers
//! - Easy testing with scripted providers and transports
//! - One error vocabulary ([`ErrorKind`]) regardless of wire protocol

pub mod error;
pub mod message;
pub mod persona;
pub mod provider;
pub mod session;
pub mod stream;

// Re-export key types at crate root for ergonomics
pub use error::{ErrorKind, ProviderError};
pub use message::{ChatMessage, ConversationRequest, ProviderKind, Role};
pub use persona::Persona;
pub use provider::{Completion, CompletionOutcome, CompletionResult, Provider};
pub use session::{GatewaySession, IdGenerator};
pub use stream::{Accumulator, ChatEvent, DeltaSink, StreamDelta};
