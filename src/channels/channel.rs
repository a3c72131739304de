//! Transport traits. Channels are pure I/O: they normalize native updates
//! into [`InboundEvent`]s and render [`Response`] descriptors back.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::session::{BroadcastReport, BroadcastRequest, InboundEvent, Response};

/// Stream of normalized inbound events.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name (e.g. "telegram", "cli").
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Render a response into the chat the event came from.
    async fn respond(&self, event: &InboundEvent, response: Response) -> Result<(), ChannelError>;

    /// Deliver one body to every recipient, counting per-recipient failures.
    /// Individual delivery errors never abort the run.
    async fn deliver_broadcast(&self, request: &BroadcastRequest) -> BroadcastReport;

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Membership check for the channel users must follow.
#[async_trait]
pub trait SubscriptionCheck: Send + Sync {
    async fn is_subscribed(&self, user_id: i64) -> Result<bool, ChannelError>;
}

/// Used when no required channel is configured.
pub struct AlwaysSubscribed;

#[async_trait]
impl SubscriptionCheck for AlwaysSubscribed {
    async fn is_subscribed(&self, _user_id: i64) -> Result<bool, ChannelError> {
        Ok(true)
    }
}
