//! Gateway to the ticketing REST backend.
//!
//! Stores only ever talk to [`TicketingApi`]; [`HttpTicketingApi`] is the
//! production implementation.

mod http;

pub use http::HttpTicketingApi;

use crate::model::{
    ActivityId, ActivityItem, Comment, Event, EventId, FollowRelation, OrganizerId,
    ServerCartItem, Ticket, TicketId, TicketType, TicketTypeId, Transaction, UserId, UserProfile,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status: 404, .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Maps a 404 to `Ok(None)`, the shape cache fetchers report a missing entity in.
pub fn found<T>(result: ApiResult<T>) -> ApiResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.is_not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddCartItem {
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub event_id: EventId,
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub items: Vec<TransactionLine>,
    pub amount: f64,
}

#[async_trait]
pub trait TicketingApi: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> ApiResult<UserProfile>;

    async fn get_users(&self, user_ids: &[UserId]) -> ApiResult<Vec<UserProfile>>;

    async fn get_followers(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>>;

    async fn get_following(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>>;

    /// Follows `user_id` as the authenticated user. The backend may answer
    /// with the created relation or with an empty body.
    async fn follow_user(&self, user_id: UserId) -> ApiResult<Option<FollowRelation>>;

    async fn unfollow_user(&self, user_id: UserId) -> ApiResult<()>;

    async fn get_event(&self, event_id: EventId) -> ApiResult<Event>;

    async fn get_organizer_events(&self, organizer_id: OrganizerId) -> ApiResult<Vec<Event>>;

    async fn get_ticket_types(&self, event_id: EventId) -> ApiResult<Vec<TicketType>>;

    async fn get_ticket(&self, ticket_id: TicketId) -> ApiResult<Ticket>;

    async fn get_user_tickets(&self, user_id: UserId) -> ApiResult<Vec<Ticket>>;

    async fn get_activity(&self, activity_id: ActivityId) -> ApiResult<ActivityItem>;

    async fn get_feed(&self, user_id: UserId) -> ApiResult<Vec<ActivityItem>>;

    async fn like_activity(&self, activity_id: ActivityId) -> ApiResult<()>;

    async fn unlike_activity(&self, activity_id: ActivityId) -> ApiResult<()>;

    async fn add_comment(
        &self,
        activity_id: ActivityId,
        content: &str,
    ) -> ApiResult<Option<Comment>>;

    async fn get_cart(&self) -> ApiResult<Vec<ServerCartItem>>;

    async fn add_cart_item(&self, item: &AddCartItem) -> ApiResult<Option<ServerCartItem>>;

    async fn update_cart_item(
        &self,
        item_id: u64,
        quantity: u32,
    ) -> ApiResult<Option<ServerCartItem>>;

    async fn remove_cart_item(&self, item_id: u64) -> ApiResult<()>;

    async fn create_transaction(&self, transaction: &NewTransaction) -> ApiResult<Transaction>;
}
