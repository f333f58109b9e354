//! Client-side state for the ticketing app: cache-first entity stores over the
//! REST API, optimistic social actions, the guest cart and activity feed
//! rendering.

pub mod activity;
pub mod api;
pub mod cache;
pub mod cart;
pub mod client;
pub mod config;
pub mod event;
pub mod model;
pub mod ticket;
pub mod user;

pub use activity::template::{Inline, PlaceholderPolicy, Segment, TemplateError};
pub use activity::{ActivityError, ActivityStore};
pub use api::{ApiError, HttpTicketingApi, TicketingApi};
pub use cache::{CacheError, EntityCache, WriteOutcome};
pub use cart::remote::RemoteCart;
pub use cart::{Cart, CartError, CartItem};
pub use client::{ClientError, RenderedActivity, TicketingClient};
pub use config::{ClientConfig, ConfigError};
pub use event::OrganizerEventStore;
pub use ticket::{TicketStore, TicketTypeStore};
pub use user::{DisplayNames, FollowError, FollowStore, UserStore};
