//! Mutation event → cached view families.
//!
//! [`TABLE`] is the single place that says which views an event can change.
//! [`plan`] resolves the families against the event's ids into concrete key
//! deletions and prefix sweeps. [`Invalidator`] executes a plan on a
//! best-effort basis: failures are logged by the cache client and never
//! reach the caller.

use crate::cache::CacheClient;
use crate::models::Viewer;
use crate::views::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    MessageSent {
        channel_id: i64,
        agent_id: i64,
        customer_id: i64,
    },
    ChannelAssigned {
        channel_id: i64,
        agent_id: i64,
        previous_agent_id: i64,
        customer_id: i64,
    },
    ChannelClosed {
        channel_id: i64,
        agent_id: i64,
        customer_id: i64,
    },
    ChannelCreated {
        channel_id: i64,
        customer_id: i64,
    },
    /// A channel-detail read acknowledged the other party's messages. Both
    /// sides' lists embed the flipped flags through their last message.
    MessagesRead {
        channel_id: i64,
        reader: Viewer,
        agent_id: i64,
        customer_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MessageSent,
    ChannelAssigned,
    ChannelClosed,
    ChannelCreated,
    MessagesRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// All role/viewer variants of the channel's detail view.
    ChannelDetail,
    LastMessage,
    /// Both viewers' unread counters for the channel.
    UnreadCounts,
    ReaderUnread,
    AgentLists,
    AgentStats,
    /// Skipped when there was no previous agent or it is the new one.
    PreviousAgentLists,
    PreviousAgentStats,
    CustomerLists,
    /// Agents only; a customer has no stats view.
    ReaderStats,
    AvailableChannels,
}

use Family::*;

pub const TABLE: &[(EventKind, &[Family])] = &[
    (
        EventKind::MessageSent,
        &[
            ChannelDetail,
            LastMessage,
            UnreadCounts,
            AgentLists,
            AgentStats,
            CustomerLists,
        ],
    ),
    (
        EventKind::ChannelAssigned,
        &[
            ChannelDetail,
            UnreadCounts,
            AgentLists,
            AgentStats,
            PreviousAgentLists,
            PreviousAgentStats,
            CustomerLists,
            AvailableChannels,
        ],
    ),
    (
        EventKind::ChannelClosed,
        &[
            ChannelDetail,
            AgentLists,
            AgentStats,
            CustomerLists,
            AvailableChannels,
        ],
    ),
    (
        EventKind::ChannelCreated,
        &[AvailableChannels, CustomerLists],
    ),
    (
        EventKind::MessagesRead,
        &[
            ReaderUnread,
            ChannelDetail,
            LastMessage,
            AgentLists,
            CustomerLists,
            ReaderStats,
        ],
    ),
];

pub fn families(kind: EventKind) -> &'static [Family] {
    TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, families)| *families)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    Sweep(String),
}

/// Ids an event carries. 0 means "none".
#[derive(Debug, Default)]
struct Scope {
    channel_id: i64,
    agent_id: i64,
    previous_agent_id: i64,
    customer_id: i64,
    reader: Option<Viewer>,
}

impl MutationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MutationEvent::MessageSent { .. } => EventKind::MessageSent,
            MutationEvent::ChannelAssigned { .. } => EventKind::ChannelAssigned,
            MutationEvent::ChannelClosed { .. } => EventKind::ChannelClosed,
            MutationEvent::ChannelCreated { .. } => EventKind::ChannelCreated,
            MutationEvent::MessagesRead { .. } => EventKind::MessagesRead,
        }
    }

    pub fn channel_id(&self) -> i64 {
        self.scope().channel_id
    }

    fn scope(&self) -> Scope {
        match *self {
            MutationEvent::MessageSent {
                channel_id,
                agent_id,
                customer_id,
            }
            | MutationEvent::ChannelClosed {
                channel_id,
                agent_id,
                customer_id,
            } => Scope {
                channel_id,
                agent_id,
                customer_id,
                ..Scope::default()
            },
            MutationEvent::ChannelAssigned {
                channel_id,
                agent_id,
                previous_agent_id,
                customer_id,
            } => Scope {
                channel_id,
                agent_id,
                previous_agent_id,
                customer_id,
                reader: None,
            },
            MutationEvent::ChannelCreated {
                channel_id,
                customer_id,
            } => Scope {
                channel_id,
                customer_id,
                ..Scope::default()
            },
            MutationEvent::MessagesRead {
                channel_id,
                reader,
                agent_id,
                customer_id,
            } => Scope {
                channel_id,
                agent_id,
                customer_id,
                reader: Some(reader),
                ..Scope::default()
            },
        }
    }
}

fn agent_views(agent_id: i64, lists: bool, out: &mut Vec<Invalidation>) {
    if agent_id == 0 {
        return;
    }
    if lists {
        out.push(Invalidation::Sweep(keys::agent_conversations_pattern(
            agent_id,
        )));
    } else {
        out.push(Invalidation::Key(keys::agent_stats(agent_id)));
    }
}

fn customer_lists(customer_id: i64, out: &mut Vec<Invalidation>) {
    if customer_id != 0 {
        out.push(Invalidation::Sweep(keys::customer_conversations_pattern(
            customer_id,
        )));
    }
}

/// Concrete deletions for one event, in table order, without duplicates.
pub fn plan(event: &MutationEvent) -> Vec<Invalidation> {
    let s = event.scope();
    let previous = if s.previous_agent_id != s.agent_id {
        s.previous_agent_id
    } else {
        0
    };

    let mut out = Vec::new();
    for family in families(event.kind()) {
        match family {
            ChannelDetail => out.push(Invalidation::Sweep(keys::channel_detail_pattern(
                s.channel_id,
            ))),
            LastMessage => out.push(Invalidation::Key(keys::last_message(s.channel_id))),
            UnreadCounts => {
                out.push(Invalidation::Key(keys::unread_count(
                    s.channel_id,
                    Viewer::Agent,
                )));
                out.push(Invalidation::Key(keys::unread_count(
                    s.channel_id,
                    Viewer::Customer,
                )));
            }
            ReaderUnread => {
                if let Some(viewer) = s.reader {
                    out.push(Invalidation::Key(keys::unread_count(s.channel_id, viewer)));
                }
            }
            AgentLists => agent_views(s.agent_id, true, &mut out),
            AgentStats => agent_views(s.agent_id, false, &mut out),
            PreviousAgentLists => agent_views(previous, true, &mut out),
            PreviousAgentStats => agent_views(previous, false, &mut out),
            CustomerLists => customer_lists(s.customer_id, &mut out),
            ReaderStats => {
                if s.reader == Some(Viewer::Agent) {
                    agent_views(s.agent_id, false, &mut out);
                }
            }
            AvailableChannels => out.push(Invalidation::Key(
                keys::AVAILABLE_CHANNELS.to_string(),
            )),
        }
    }

    let mut unique = Vec::with_capacity(out.len());
    for item in out {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

#[derive(Clone)]
pub struct Invalidator {
    cache: CacheClient,
}

impl Invalidator {
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    /// Execute the plan for `event`. Never fails.
    pub async fn apply(&self, event: &MutationEvent) {
        let steps = plan(event);
        let mut removed = 0usize;
        for step in &steps {
            match step {
                Invalidation::Key(key) => self.cache.delete(key).await,
                Invalidation::Sweep(pattern) => removed += self.cache.delete_matching(pattern).await,
            }
        }
        tracing::debug!(
            event = ?event.kind(),
            channel_id = event.channel_id(),
            steps = steps.len(),
            swept = removed,
            "cache invalidated"
        );
    }
}
