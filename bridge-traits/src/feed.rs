//! Change Feed Abstraction
//!
//! Push-based row-level change notifications. A channel is opened for one
//! table with a static filter expression; its filter can never be changed
//! afterwards, so a different row set means a different channel.
//!
//! A [`FeedChannel`] carries two things:
//! - `messages`: a stream of [`FeedMessage`]s (raw change payloads interleaved
//!   with channel status transitions), and
//! - `handle`: the teardown side, closed exactly once by its owner.
//!
//! Payloads are delivered raw (`serde_json::Value`); shape validation is the
//! consumer's job.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;

/// Channel status transitions reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

/// One item on a channel's message stream
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Raw `{eventType, new?, old?}` payload
    Change(Value),
    Status(ChannelStatus),
}

/// What to listen to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Logical channel name, unique per open channel
    pub name: String,
    pub table: String,
    /// Filter expression, e.g. `song_id=in.("a","b")`
    pub filter: String,
}

/// Teardown side of an open channel
pub trait ChannelHandle: Send + Sync {
    /// Stop delivery and release the channel. Must be idempotent.
    fn close(&self);
}

/// An open channel
pub struct FeedChannel {
    pub messages: BoxStream<'static, FeedMessage>,
    pub handle: Box<dyn ChannelHandle>,
}

impl fmt::Debug for FeedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedChannel").finish_non_exhaustive()
    }
}

/// Change-feed provider
///
/// # Example
///
/// ```ignore
/// use bridge_traits::feed::{ChangeFeed, ChannelRequest, FeedMessage};
/// use futures::StreamExt;
///
/// async fn watch(feed: &dyn ChangeFeed, token: &str) -> Result<()> {
///     let mut channel = feed
///         .open_channel(token, ChannelRequest {
///             name: "songs-1".into(),
///             table: "song_public".into(),
///             filter: "song_id=in.(\"a\")".into(),
///         })
///         .await?;
///     while let Some(FeedMessage::Change(payload)) = channel.messages.next().await {
///         println!("{payload}");
///     }
///     channel.handle.close();
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a channel scoped to the given table and filter
    ///
    /// # Errors
    ///
    /// Returns error if the provider could not be reached. Later failures are
    /// reported in-band as [`ChannelStatus`] messages.
    async fn open_channel(&self, access_token: &str, request: ChannelRequest)
        -> Result<FeedChannel>;
}
