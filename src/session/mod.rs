//! Conversational layer: normalized events in, response descriptors out.

pub mod action;
mod admin;
mod flows;
pub mod input;
pub mod machine;
pub mod prompts;
pub mod response;
pub mod state;
pub mod store;

pub use action::{Action, Command, InboundEvent};
pub use admin::BROADCAST_HEADER;
pub use machine::SessionMachine;
pub use response::{BroadcastReport, BroadcastRequest, Button, Keyboard, Response};
pub use state::{Flow, Role, Session};
pub use store::{SessionStore, spawn_prune_task};
