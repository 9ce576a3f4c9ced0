pub mod client;
pub mod error;
pub mod manager;
pub mod normalize;

pub use client::{MailSession, RawMessage};
pub use error::ImapError;
pub use manager::{AccountManager, AccountState, StateRegistry};
