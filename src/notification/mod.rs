//! Change notifications published to live subscribers after a mutation.

use serde::Serialize;

use crate::cache::CacheClient;
use crate::models::{Channel, Message};

/// Published as JSON on `channel:{id}`, tagged by `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeNotice {
    ChannelCreated {
        channel: Channel,
        timestamp: String,
    },
    ChannelAssigned {
        channel: Channel,
        previous_agent_id: i64,
        timestamp: String,
    },
    ChannelClosed {
        channel: Channel,
        timestamp: String,
    },
    MessageSent {
        message: Message,
        timestamp: String,
    },
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl ChangeNotice {
    pub fn channel_created(channel: &Channel) -> Self {
        ChangeNotice::ChannelCreated {
            channel: channel.clone(),
            timestamp: now(),
        }
    }

    pub fn channel_assigned(channel: &Channel, previous_agent_id: i64) -> Self {
        ChangeNotice::ChannelAssigned {
            channel: channel.clone(),
            previous_agent_id,
            timestamp: now(),
        }
    }

    pub fn channel_closed(channel: &Channel) -> Self {
        ChangeNotice::ChannelClosed {
            channel: channel.clone(),
            timestamp: now(),
        }
    }

    pub fn message_sent(message: &Message) -> Self {
        ChangeNotice::MessageSent {
            message: message.clone(),
            timestamp: now(),
        }
    }

    pub fn channel_id(&self) -> i64 {
        match self {
            ChangeNotice::ChannelCreated { channel, .. }
            | ChangeNotice::ChannelAssigned { channel, .. }
            | ChangeNotice::ChannelClosed { channel, .. } => channel.id,
            ChangeNotice::MessageSent { message, .. } => message.channel_id,
        }
    }
}

pub fn topic(channel_id: i64) -> String {
    format!("channel:{}", channel_id)
}

#[derive(Clone)]
pub struct ChangeNotifier {
    cache: CacheClient,
}

impl ChangeNotifier {
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    /// Fire-and-forget. A lost notice only delays live clients until their
    /// next fetch.
    pub async fn notify(&self, notice: &ChangeNotice) {
        let payload = match serde_json::to_string(notice) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize change notice");
                return;
            }
        };
        self.cache.publish(&topic(notice.channel_id()), &payload).await;
    }
}
