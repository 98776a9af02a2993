//! Read-model freshness across mutations.
//!
//! Each scenario primes a cached view, performs a write through the service
//! layer, and checks that the next read reflects it without waiting for a TTL.

mod common;

use deskline::models::{ChannelStatus, Role, SenderType, Viewer};
use deskline::store::SupportStore;
use deskline::views::ConversationQuery;

use common::harness;

#[tokio::test]
async fn test_agent_read_resets_unread_in_cached_list() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "my order is late").await.unwrap();
    desk.assign_channel(agent, channel.id, None).await.unwrap();

    let page = views
        .agent_conversations(agent.user_id, ConversationQuery::default())
        .await
        .unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].unread_count, 1);

    views.channel_detail(agent, channel.id).await.unwrap();

    let page = views
        .agent_conversations(agent.user_id, ConversationQuery::default())
        .await
        .unwrap();
    assert_eq!(page.data[0].unread_count, 0);
    assert_eq!(views.agent_stats(agent.user_id).await.unwrap().unread, 0);

    // The customer's own counter is untouched by the agent's read.
    desk.send_message(agent, channel.id, "looking into it").await.unwrap();
    assert_eq!(views.unread_count(channel.id, Viewer::Customer).await.unwrap(), 1);
    assert_eq!(views.unread_count(channel.id, Viewer::Agent).await.unwrap(), 0);
}

#[tokio::test]
async fn test_detail_read_marks_customer_messages_read() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "one").await.unwrap();
    desk.assign_channel(agent, channel.id, None).await.unwrap();
    desk.send_message(customer, channel.id, "two").await.unwrap();
    desk.send_message(customer, channel.id, "three").await.unwrap();

    assert_eq!(views.unread_count(channel.id, Viewer::Agent).await.unwrap(), 3);

    let detail = views.channel_detail(agent, channel.id).await.unwrap();
    assert_eq!(detail.messages.len(), 3);

    assert_eq!(views.unread_count(channel.id, Viewer::Agent).await.unwrap(), 0);
    let rows = h.store.list_messages(channel.id).await.unwrap();
    assert!(rows
        .iter()
        .filter(|m| m.sender_type == SenderType::Customer)
        .all(|m| m.is_read));
}

#[tokio::test]
async fn test_agent_read_flips_last_message_flag_on_both_sides() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "still waiting").await.unwrap();
    desk.assign_channel(agent, channel.id, None).await.unwrap();

    let q = ConversationQuery::default();
    assert!(!views.last_message(channel.id).await.unwrap().unwrap().is_read);
    views.agent_conversations(agent.user_id, q.clone()).await.unwrap();
    views.customer_conversations(customer.user_id, q.clone()).await.unwrap();

    views.channel_detail(agent, channel.id).await.unwrap();

    assert!(views.last_message(channel.id).await.unwrap().unwrap().is_read);
    let agent_page = views.agent_conversations(agent.user_id, q.clone()).await.unwrap();
    assert_eq!(agent_page.data[0].unread_count, 0);
    assert!(agent_page.data[0].last_message.as_ref().unwrap().is_read);
    let customer_page = views.customer_conversations(customer.user_id, q).await.unwrap();
    assert!(customer_page.data[0].last_message.as_ref().unwrap().is_read);
}

#[tokio::test]
async fn test_agent_cannot_claim_a_channel_held_by_another() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let first = h.identity("first@example.com", Role::Agent).await;
    let second = h.identity("second@example.com", Role::Agent).await;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "help").await.unwrap();
    desk.assign_channel(first, channel.id, None).await.unwrap();

    let err = desk.assign_channel(second, channel.id, None).await.unwrap_err();
    assert!(matches!(err, deskline::errors::AppError::NotFound(_)));
    let held = h.store.get_channel(channel.id).await.unwrap().unwrap();
    assert_eq!(held.assigned_agent_id, first.user_id);
}

#[tokio::test]
async fn test_new_message_refreshes_cached_stats_and_last_message() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "hello").await.unwrap();
    desk.assign_channel(agent, channel.id, None).await.unwrap();
    views.channel_detail(agent, channel.id).await.unwrap();

    let stats = views.agent_stats(agent.user_id).await.unwrap();
    assert_eq!(stats.unread, 0);
    assert_eq!(stats.assigned, 1);

    desk.send_message(customer, channel.id, "any update?").await.unwrap();

    assert_eq!(views.agent_stats(agent.user_id).await.unwrap().unread, 1);
    let last = views.last_message(channel.id).await.unwrap().unwrap();
    assert_eq!(last.message, "any update?");
}

#[tokio::test]
async fn test_reassignment_moves_channel_between_agent_lists() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let first = h.identity("first@example.com", Role::Agent).await;
    let second = h.identity("second@example.com", Role::Agent).await;
    let admin = h.identity("admin@example.com", Role::Admin).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "help").await.unwrap();
    desk.assign_channel(admin, channel.id, Some(first.user_id))
        .await
        .unwrap();

    let q = ConversationQuery::default();
    assert_eq!(views.agent_conversations(first.user_id, q).await.unwrap().data.len(), 1);
    assert!(views.agent_conversations(second.user_id, q).await.unwrap().data.is_empty());
    assert_eq!(views.agent_stats(first.user_id).await.unwrap().assigned, 1);

    let moved = desk
        .assign_channel(admin, channel.id, Some(second.user_id))
        .await
        .unwrap();
    assert_eq!(moved.assigned_agent_id, second.user_id);

    assert!(views.agent_conversations(first.user_id, q).await.unwrap().data.is_empty());
    let page = views.agent_conversations(second.user_id, q).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].assigned_agent_id, second.user_id);
    assert_eq!(views.agent_stats(first.user_id).await.unwrap().assigned, 0);
    assert_eq!(views.agent_stats(second.user_id).await.unwrap().assigned, 1);
}

#[tokio::test]
async fn test_claim_removes_channel_from_available_list() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (older, _) = desk.create_channel(customer, None, "first").await.unwrap();
    let (newer, _) = desk.create_channel(customer, None, "second").await.unwrap();

    let available = views.available_channels().await.unwrap();
    let ids: Vec<i64> = available.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![older.id, newer.id]);

    desk.assign_channel(agent, older.id, None).await.unwrap();
    let available = views.available_channels().await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, newer.id);
}

#[tokio::test]
async fn test_close_refreshes_agent_and_customer_lists() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let views = &h.state.views;
    let desk = &h.state.desk;

    let (channel, _) = desk.create_channel(customer, None, "refund please").await.unwrap();
    desk.assign_channel(agent, channel.id, None).await.unwrap();

    let q = ConversationQuery::default();
    assert_eq!(
        views.agent_conversations(agent.user_id, q).await.unwrap().data[0].status,
        ChannelStatus::Assigned
    );
    assert_eq!(
        views.customer_conversations(customer.user_id, q).await.unwrap().data[0].status,
        ChannelStatus::Assigned
    );

    desk.close_channel(agent, channel.id).await.unwrap();

    assert_eq!(
        views.agent_conversations(agent.user_id, q).await.unwrap().data[0].status,
        ChannelStatus::Closed
    );
    assert_eq!(
        views.customer_conversations(customer.user_id, q).await.unwrap().data[0].status,
        ChannelStatus::Closed
    );
    let detail = views.channel_detail(customer, channel.id).await.unwrap();
    assert_eq!(detail.channel.status, ChannelStatus::Closed);
    assert_eq!(views.agent_stats(agent.user_id).await.unwrap().closed, 1);
}

#[tokio::test]
async fn test_new_channel_appears_in_cached_customer_list() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let views = &h.state.views;

    let q = ConversationQuery::default();
    assert!(views.customer_conversations(customer.user_id, q).await.unwrap().data.is_empty());

    h.state.desk.create_channel(customer, None, "hi").await.unwrap();
    let page = views.customer_conversations(customer.user_id, q).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.data[0].customer_email, "customer@example.com");
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_store() {
    let h = harness();
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let desk = &h.state.desk;
    let views = &h.state.views;

    let (channel, _) = desk.create_channel(customer, None, "hi").await.unwrap();
    h.cache.set_offline(true);

    // Writes succeed even though their invalidation is lost, and reads
    // recompute from the store.
    desk.assign_channel(agent, channel.id, None).await.unwrap();
    let page = views
        .agent_conversations(agent.user_id, ConversationQuery::default())
        .await
        .unwrap();
    assert_eq!(page.data[0].id, channel.id);
    assert_eq!(page.data[0].unread_count, 1);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_store_outage_surfaces_on_uncached_read() {
    let h = harness();
    let agent = h.identity("agent@example.com", Role::Agent).await;
    h.store.set_offline(true);

    let err = h
        .state
        .views
        .agent_conversations(agent.user_id, ConversationQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, deskline::errors::AppError::DependencyUnavailable(_)));
}
