#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use ticketing_client::api::{AddCartItem, ApiError, ApiResult, NewTransaction};
use ticketing_client::model::{
    ActivityId, ActivityItem, Comment, Event, EventId, FollowRelation, OrganizerId,
    ServerCartItem, Ticket, TicketId, TicketType, Transaction, UserId, UserProfile,
};
use ticketing_client::TicketingApi;
use tokio::sync::Notify;

/// In-process backend. Counts calls per operation; reads and writes can be
/// held on a gate or made to fail.
pub struct MockApi {
    pub viewer_id: UserId,
    pub users: Mutex<HashMap<UserId, UserProfile>>,
    pub followers: Mutex<HashMap<UserId, Vec<FollowRelation>>>,
    pub following: Mutex<HashMap<UserId, Vec<FollowRelation>>>,
    pub events: Mutex<HashMap<EventId, Event>>,
    pub ticket_types: Mutex<HashMap<EventId, Vec<TicketType>>>,
    pub tickets: Mutex<HashMap<UserId, Vec<Ticket>>>,
    pub feeds: Mutex<HashMap<UserId, Vec<ActivityItem>>>,
    pub server_cart: Mutex<Vec<ServerCartItem>>,
    pub transactions: Mutex<Vec<NewTransaction>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub read_gate: Mutex<Option<Arc<Notify>>>,
    pub write_gate: Mutex<Option<Arc<Notify>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: AtomicU64,
}

impl MockApi {
    pub fn new(viewer_id: UserId) -> Arc<Self> {
        Arc::new(MockApi {
            viewer_id,
            users: Mutex::default(),
            followers: Mutex::default(),
            following: Mutex::default(),
            events: Mutex::default(),
            ticket_types: Mutex::default(),
            tickets: Mutex::default(),
            feeds: Mutex::default(),
            server_cart: Mutex::default(),
            transactions: Mutex::default(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            read_gate: Mutex::default(),
            write_gate: Mutex::default(),
            calls: Mutex::default(),
            next_id: AtomicU64::new(1000),
        })
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().get(operation).copied().unwrap_or(0)
    }

    pub fn add_user(&self, user: UserProfile) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn add_event(&self, event: Event) {
        self.events.lock().unwrap().insert(event.id, event);
    }

    pub fn hold_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn hold_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.read_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    async fn read(&self, operation: &'static str) -> ApiResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        let gate = self.read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(())
    }

    async fn write(&self, operation: &'static str) -> ApiResult<()> {
        *self.calls.lock().unwrap().entry(operation).or_default() += 1;
        let gate = self.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: 500,
        message: "backend unavailable".to_string(),
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl TicketingApi for MockApi {
    async fn get_user(&self, user_id: UserId) -> ApiResult<UserProfile> {
        self.read("get_user").await?;
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| not_found("user"))
    }

    async fn get_users(&self, user_ids: &[UserId]) -> ApiResult<Vec<UserProfile>> {
        self.read("get_users").await?;
        let users = self.users.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn get_followers(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>> {
        self.read("get_followers").await?;
        Ok(self.followers.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_following(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>> {
        self.read("get_following").await?;
        Ok(self.following.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn follow_user(&self, user_id: UserId) -> ApiResult<Option<FollowRelation>> {
        self.write("follow_user").await?;
        let relation = FollowRelation {
            id: Some(self.next_id()),
            follower_id: self.viewer_id,
            followed_id: user_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.following
            .lock()
            .unwrap()
            .entry(self.viewer_id)
            .or_default()
            .push(relation.clone());
        self.followers
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push(relation.clone());
        Ok(Some(relation))
    }

    async fn unfollow_user(&self, user_id: UserId) -> ApiResult<()> {
        self.write("unfollow_user").await?;
        let viewer_id = self.viewer_id;
        if let Some(list) = self.following.lock().unwrap().get_mut(&viewer_id) {
            list.retain(|r| !r.connects(viewer_id, user_id));
        }
        if let Some(list) = self.followers.lock().unwrap().get_mut(&user_id) {
            list.retain(|r| !r.connects(viewer_id, user_id));
        }
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> ApiResult<Event> {
        self.read("get_event").await?;
        self.events
            .lock()
            .unwrap()
            .get(&event_id)
            .cloned()
            .ok_or_else(|| not_found("event"))
    }

    async fn get_organizer_events(&self, organizer_id: OrganizerId) -> ApiResult<Vec<Event>> {
        self.read("get_organizer_events").await?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|event| event.organizer_id == organizer_id)
            .cloned()
            .collect())
    }

    async fn get_ticket_types(&self, event_id: EventId) -> ApiResult<Vec<TicketType>> {
        self.read("get_ticket_types").await?;
        Ok(self
            .ticket_types
            .lock()
            .unwrap()
            .get(&event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> ApiResult<Ticket> {
        self.read("get_ticket").await?;
        self.tickets
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|ticket| ticket.id == ticket_id)
            .cloned()
            .ok_or_else(|| not_found("ticket"))
    }

    async fn get_user_tickets(&self, user_id: UserId) -> ApiResult<Vec<Ticket>> {
        self.read("get_user_tickets").await?;
        Ok(self.tickets.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_activity(&self, activity_id: ActivityId) -> ApiResult<ActivityItem> {
        self.read("get_activity").await?;
        self.feeds
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|item| item.id == activity_id)
            .cloned()
            .ok_or_else(|| not_found("activity"))
    }

    async fn get_feed(&self, user_id: UserId) -> ApiResult<Vec<ActivityItem>> {
        self.read("get_feed").await?;
        Ok(self.feeds.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
    }

    async fn like_activity(&self, _activity_id: ActivityId) -> ApiResult<()> {
        self.write("like_activity").await
    }

    async fn unlike_activity(&self, _activity_id: ActivityId) -> ApiResult<()> {
        self.write("unlike_activity").await
    }

    async fn add_comment(
        &self,
        activity_id: ActivityId,
        content: &str,
    ) -> ApiResult<Option<Comment>> {
        self.write("add_comment").await?;
        Ok(Some(Comment {
            id: self.next_id(),
            activity_id,
            user_id: self.viewer_id,
            content: content.to_string(),
            created_at: Some(Utc::now()),
        }))
    }

    async fn get_cart(&self) -> ApiResult<Vec<ServerCartItem>> {
        self.read("get_cart").await?;
        Ok(self.server_cart.lock().unwrap().clone())
    }

    async fn add_cart_item(&self, item: &AddCartItem) -> ApiResult<Option<ServerCartItem>> {
        self.write("add_cart_item").await?;
        let price = self
            .events
            .lock()
            .unwrap()
            .get(&item.event_id)
            .map(|event| event.price)
            .unwrap_or_default();
        let created = ServerCartItem {
            id: self.next_id(),
            event_id: item.event_id,
            ticket_type_id: item.ticket_type_id,
            quantity: item.quantity,
            price,
        };
        self.server_cart.lock().unwrap().push(created.clone());
        Ok(Some(created))
    }

    async fn update_cart_item(
        &self,
        item_id: u64,
        quantity: u32,
    ) -> ApiResult<Option<ServerCartItem>> {
        self.write("update_cart_item").await?;
        let mut cart = self.server_cart.lock().unwrap();
        let item = cart
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| not_found("cart item"))?;
        item.quantity = quantity;
        Ok(Some(item.clone()))
    }

    async fn remove_cart_item(&self, item_id: u64) -> ApiResult<()> {
        self.write("remove_cart_item").await?;
        self.server_cart.lock().unwrap().retain(|item| item.id != item_id);
        Ok(())
    }

    async fn create_transaction(&self, transaction: &NewTransaction) -> ApiResult<Transaction> {
        self.write("create_transaction").await?;
        self.transactions.lock().unwrap().push(transaction.clone());
        Ok(Transaction {
            id: self.next_id(),
            user_id: self.viewer_id,
            amount: transaction.amount,
            status: "completed".to_string(),
            created_at: Some(Utc::now()),
        })
    }
}

pub fn user(id: UserId, firstname: &str, lastname: &str) -> UserProfile {
    let mut user = UserProfile::new(id);
    user.firstname = Some(firstname.to_string());
    user.lastname = Some(lastname.to_string());
    user
}

pub fn event(id: EventId, organizer_id: OrganizerId, title: &str, price: f64, day: u32) -> Event {
    Event {
        id,
        organizer_id,
        title: title.to_string(),
        description: None,
        location: "Riverside Arena".to_string(),
        date: Utc.with_ymd_and_hms(2024, 11, day, 20, 0, 0).unwrap(),
        image: None,
        price,
        capacity: Some(500),
        tickets_sold: Some(10),
    }
}

pub fn activity(id: ActivityId, user_id: UserId, template: &str, minute: u32) -> ActivityItem {
    let mut item = ActivityItem::new(id, template);
    item.user_id = Some(user_id);
    item.modified_at = Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap();
    item
}

/// Yields to the runtime until `condition` holds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
