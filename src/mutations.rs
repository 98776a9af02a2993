//! Writes against the relational store. Each one commits first, then runs
//! invalidation, then publishes a change notice. Neither follow-up can fail
//! the write.

use std::sync::Arc;

use crate::errors::AppError;
use crate::invalidation::{Invalidator, MutationEvent};
use crate::models::{Channel, Identity, Message, Role, SenderType};
use crate::notification::{ChangeNotice, ChangeNotifier};
use crate::store::SupportStore;
use crate::views::visible_to;

pub const DEFAULT_TENANT_ID: i64 = 1;
pub const MAX_MESSAGE_LEN: usize = 5000;

fn message_body(raw: &str) -> Result<&str, AppError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(AppError::validation("message is required"));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(AppError::validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(body)
}

#[derive(Clone)]
pub struct SupportDesk {
    store: Arc<dyn SupportStore>,
    invalidator: Invalidator,
    notifier: ChangeNotifier,
}

impl SupportDesk {
    pub fn new(
        store: Arc<dyn SupportStore>,
        invalidator: Invalidator,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            store,
            invalidator,
            notifier,
        }
    }

    async fn load_channel(&self, channel_id: i64) -> Result<Channel, AppError> {
        self.store
            .get_channel(channel_id)
            .await
            .map_err(AppError::unavailable)?
            .ok_or_else(|| AppError::not_found("Channel"))
    }

    /// A customer opens a channel with its first message.
    pub async fn create_channel(
        &self,
        actor: Identity,
        tenant_id: Option<i64>,
        first_message: &str,
    ) -> Result<(Channel, Message), AppError> {
        if actor.role != Role::User {
            return Err(AppError::Forbidden(
                "only customers can open channels".to_string(),
            ));
        }
        let body = message_body(first_message)?;
        let tenant_id = tenant_id.filter(|t| *t > 0).unwrap_or(DEFAULT_TENANT_ID);

        let (channel, message) = self
            .store
            .create_channel(tenant_id, actor.user_id, body)
            .await
            .map_err(AppError::unavailable)?;
        tracing::info!(channel_id = channel.id, customer_id = actor.user_id, "channel created");

        self.invalidator
            .apply(&MutationEvent::ChannelCreated {
                channel_id: channel.id,
                customer_id: channel.customer_id,
            })
            .await;
        self.notifier
            .notify(&ChangeNotice::channel_created(&channel))
            .await;
        Ok((channel, message))
    }

    /// Agents claim for themselves; admins assign to the agent named in
    /// `target`.
    pub async fn assign_channel(
        &self,
        actor: Identity,
        channel_id: i64,
        target: Option<i64>,
    ) -> Result<Channel, AppError> {
        let channel = self.load_channel(channel_id).await?;

        let agent_id = match actor.role {
            Role::Agent => {
                if target.is_some_and(|t| t != actor.user_id) {
                    return Err(AppError::Forbidden(
                        "agents can only claim channels for themselves".to_string(),
                    ));
                }
                let claimable = channel.assigned_agent_id == 0
                    || channel.is_assigned_to(actor.user_id);
                if !claimable {
                    return Err(AppError::not_found("Channel"));
                }
                actor.user_id
            }
            Role::Admin => {
                let target =
                    target.ok_or_else(|| AppError::validation("agent_id is required"))?;
                let agent = self
                    .store
                    .get_user(target)
                    .await
                    .map_err(AppError::unavailable)?;
                match agent {
                    Some(user) if user.role == Role::Agent && user.is_active => user.id,
                    _ => {
                        return Err(AppError::validation(
                            "agent_id must reference an active agent",
                        ))
                    }
                }
            }
            Role::User => {
                return Err(AppError::Forbidden(
                    "customers cannot assign channels".to_string(),
                ))
            }
        };

        if channel.is_closed() {
            return Err(AppError::validation("Channel is closed"));
        }

        let claim = actor.role == Role::Agent;
        let assignment = match self
            .store
            .assign_channel(channel_id, agent_id, claim)
            .await
            .map_err(AppError::unavailable)?
        {
            Some(assignment) => assignment,
            // closed meanwhile, or another agent's claim landed first
            None => {
                let current = self.load_channel(channel_id).await?;
                if current.is_closed() {
                    return Err(AppError::validation("Channel is closed"));
                }
                return Err(AppError::not_found("Channel"));
            }
        };
        tracing::info!(
            channel_id,
            agent_id,
            previous_agent_id = assignment.previous_agent_id,
            by = %actor.role,
            "channel assigned"
        );

        self.invalidator
            .apply(&MutationEvent::ChannelAssigned {
                channel_id,
                agent_id,
                previous_agent_id: assignment.previous_agent_id,
                customer_id: assignment.channel.customer_id,
            })
            .await;
        self.notifier
            .notify(&ChangeNotice::channel_assigned(
                &assignment.channel,
                assignment.previous_agent_id,
            ))
            .await;
        Ok(assignment.channel)
    }

    /// The owning agent or any admin.
    pub async fn close_channel(
        &self,
        actor: Identity,
        channel_id: i64,
    ) -> Result<Channel, AppError> {
        let channel = self.load_channel(channel_id).await?;
        match actor.role {
            Role::Admin => {}
            Role::Agent if channel.is_assigned_to(actor.user_id) => {}
            Role::Agent => return Err(AppError::not_found("Channel")),
            Role::User => {
                return Err(AppError::Forbidden(
                    "customers cannot close channels".to_string(),
                ))
            }
        }
        if channel.is_closed() {
            return Err(AppError::validation("Channel is already closed"));
        }

        let closed = self
            .store
            .close_channel(channel_id)
            .await
            .map_err(AppError::unavailable)?
            .ok_or_else(|| AppError::validation("Channel is already closed"))?;
        tracing::info!(channel_id, by = %actor.role, "channel closed");

        self.invalidator
            .apply(&MutationEvent::ChannelClosed {
                channel_id,
                agent_id: closed.assigned_agent_id,
                customer_id: closed.customer_id,
            })
            .await;
        self.notifier
            .notify(&ChangeNotice::channel_closed(&closed))
            .await;
        Ok(closed)
    }

    /// The channel's customer or its assigned agent.
    pub async fn send_message(
        &self,
        actor: Identity,
        channel_id: i64,
        body: &str,
    ) -> Result<Message, AppError> {
        let body = message_body(body)?;
        let channel = self.load_channel(channel_id).await?;

        let sender = match actor.role {
            Role::User => SenderType::Customer,
            Role::Agent => SenderType::Agent,
            Role::Admin => {
                return Err(AppError::Forbidden(
                    "admins observe conversations and cannot post".to_string(),
                ))
            }
        };
        if !visible_to(&channel, actor) {
            return Err(AppError::not_found("Channel"));
        }
        if channel.is_closed() {
            return Err(AppError::validation("Channel is closed"));
        }

        let message = self
            .store
            .insert_message(channel_id, sender, body)
            .await
            .map_err(AppError::unavailable)?;
        tracing::debug!(channel_id, sender = sender.as_str(), message_id = message.id, "message sent");

        self.invalidator
            .apply(&MutationEvent::MessageSent {
                channel_id,
                agent_id: channel.assigned_agent_id,
                customer_id: channel.customer_id,
            })
            .await;
        self.notifier
            .notify(&ChangeNotice::message_sent(&message))
            .await;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_rules() {
        assert_eq!(message_body("  hi  ").unwrap(), "hi");
        assert!(message_body("   ").is_err());
        assert!(message_body(&"x".repeat(MAX_MESSAGE_LEN + 1)).is_err());
        assert!(message_body(&"x".repeat(MAX_MESSAGE_LEN)).is_ok());
    }
}
