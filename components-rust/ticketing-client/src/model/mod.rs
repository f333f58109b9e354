pub mod ingress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type EventId = u64;
pub type TicketId = u64;
pub type TicketTypeId = u64;
pub type ActivityId = u64;
pub type OrganizerId = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "ingress::number")]
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "ingress::opt_email")]
    pub email: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(id: UserId) -> Self {
        UserProfile {
            id,
            username: None,
            email: None,
            firstname: None,
            lastname: None,
            avatar_url: None,
            created_at: None,
        }
    }

    /// `firstname lastname`, then `username`, then `email`, then `User {id}`.
    pub fn display_name(&self) -> String {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }

        let full_name = [non_empty(&self.firstname), non_empty(&self.lastname)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            full_name
        } else if let Some(username) = non_empty(&self.username) {
            username.to_string()
        } else if let Some(email) = non_empty(&self.email) {
            email.to_string()
        } else {
            fallback_display_name(self.id)
        }
    }
}

pub fn fallback_display_name(user_id: UserId) -> String {
    format!("User {user_id}")
}

/// Directed edge `follower_id -> followed_id`. `id` stays empty while the
/// follow exists only locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FollowRelation {
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub id: Option<u64>,
    #[serde(deserialize_with = "ingress::number")]
    pub follower_id: UserId,
    #[serde(deserialize_with = "ingress::number")]
    pub followed_id: UserId,
    #[serde(deserialize_with = "ingress::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FollowRelation {
    pub fn provisional(follower_id: UserId, followed_id: UserId) -> Self {
        FollowRelation {
            id: None,
            follower_id,
            followed_id,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }

    pub fn connects(&self, follower_id: UserId, followed_id: UserId) -> bool {
        self.follower_id == follower_id && self.followed_id == followed_id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(deserialize_with = "ingress::number")]
    pub id: EventId,
    #[serde(deserialize_with = "ingress::number")]
    pub organizer_id: OrganizerId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(deserialize_with = "ingress::timestamp")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(deserialize_with = "ingress::number")]
    pub price: f64,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub capacity: Option<u32>,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub tickets_sold: Option<u32>,
}

impl Event {
    pub fn remaining_capacity(&self) -> Option<u32> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.tickets_sold.unwrap_or(0)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketType {
    #[serde(deserialize_with = "ingress::number")]
    pub id: TicketTypeId,
    #[serde(deserialize_with = "ingress::number")]
    pub event_id: EventId,
    pub name: String,
    #[serde(deserialize_with = "ingress::number")]
    pub price: f64,
    #[serde(deserialize_with = "ingress::number")]
    pub quantity_available: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(deserialize_with = "ingress::number")]
    pub id: TicketId,
    #[serde(deserialize_with = "ingress::number")]
    pub event_id: EventId,
    #[serde(deserialize_with = "ingress::number")]
    pub user_id: UserId,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub ticket_type_id: Option<TicketTypeId>,
    #[serde(deserialize_with = "ingress::number")]
    pub quantity: u32,
    #[serde(deserialize_with = "ingress::number")]
    pub total_price: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub purchased_at: Option<DateTime<Utc>>,
}

/// Feed entry. `template_text` carries `{token}` placeholders filled from the
/// optional data fields by [`crate::activity::template`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    #[serde(deserialize_with = "ingress::number")]
    pub id: ActivityId,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub activity_type: String,
    pub template_text: String,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub reference_id_1: Option<u64>,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub reference_id_2: Option<u64>,
    #[serde(default)]
    pub event_title: Option<String>,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub ticket_quantity: Option<u32>,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub review_rating: Option<u8>,
    #[serde(default)]
    pub achievement_name: Option<String>,
    #[serde(default, deserialize_with = "ingress::count")]
    pub reaction_count: u32,
    #[serde(default, deserialize_with = "ingress::count")]
    pub comment_count: u32,
    #[serde(default, deserialize_with = "ingress::flag")]
    pub has_liked: bool,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "ingress::timestamp")]
    pub modified_at: DateTime<Utc>,
}

impl ActivityItem {
    pub fn new(id: ActivityId, template_text: impl Into<String>) -> Self {
        ActivityItem {
            id,
            user_id: None,
            activity_type: String::new(),
            template_text: template_text.into(),
            reference_id_1: None,
            reference_id_2: None,
            event_title: None,
            event_date: None,
            ticket_quantity: None,
            review_rating: None,
            achievement_name: None,
            reaction_count: 0,
            comment_count: 0,
            has_liked: false,
            created_at: None,
            modified_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(deserialize_with = "ingress::number")]
    pub id: u64,
    #[serde(deserialize_with = "ingress::number")]
    pub activity_id: ActivityId,
    #[serde(deserialize_with = "ingress::number")]
    pub user_id: UserId,
    pub content: String,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Line of the server-side cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerCartItem {
    #[serde(deserialize_with = "ingress::number")]
    pub id: u64,
    #[serde(deserialize_with = "ingress::number")]
    pub event_id: EventId,
    #[serde(default, deserialize_with = "ingress::opt_number")]
    pub ticket_type_id: Option<TicketTypeId>,
    #[serde(deserialize_with = "ingress::number")]
    pub quantity: u32,
    #[serde(deserialize_with = "ingress::number")]
    pub price: f64,
}

impl ServerCartItem {
    pub fn total_price(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "ingress::number")]
    pub id: u64,
    #[serde(deserialize_with = "ingress::number")]
    pub user_id: UserId,
    #[serde(deserialize_with = "ingress::number")]
    pub amount: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "ingress::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}
