use crate::activity::template::{self, Inline, PlaceholderPolicy, TemplateError};
use crate::activity::ActivityStore;
use crate::api::{ApiError, HttpTicketingApi, TicketingApi};
use crate::cache::CacheError;
use crate::cart::remote::RemoteCart;
use crate::cart::{Cart, CartError, CartItem};
use crate::config::{ClientConfig, ConfigError};
use crate::event::OrganizerEventStore;
use crate::model::{ActivityItem, EventId, Transaction, UserId};
use crate::ticket::{TicketStore, TicketTypeStore};
use crate::user::{FollowStore, UserStore};
use common_lib::{FileStorage, KeyValueStorage, StorageError};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedActivity {
    pub item: ActivityItem,
    pub inlines: Vec<Inline>,
}

impl RenderedActivity {
    pub fn plain_text(&self) -> String {
        template::to_plain_text(&self.inlines)
    }
}

/// Every store of one signed-in session, sharing a single API gateway.
#[derive(Clone)]
pub struct TicketingClient {
    api: Arc<dyn TicketingApi>,
    placeholder_policy: PlaceholderPolicy,
    users: UserStore,
    follows: FollowStore,
    tickets: TicketStore,
    ticket_types: TicketTypeStore,
    events: OrganizerEventStore,
    activities: ActivityStore,
    cart: Cart,
    remote_cart: RemoteCart,
}

impl TicketingClient {
    /// HTTP gateway plus a cart persisted under `config.storage_dir`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let api = HttpTicketingApi::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.fetch_timeout,
        )?;
        let storage = FileStorage::open(&config.storage_dir)?;
        log::info!(api = api.base_url(), storage:? = storage.dir(); "ticketing client ready");

        Ok(Self::with_parts(&config, Arc::new(api), Arc::new(storage)))
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env_or_file()?)
    }

    pub fn with_parts(
        config: &ClientConfig,
        api: Arc<dyn TicketingApi>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Self {
        let timeout = config.fetch_timeout;
        TicketingClient {
            placeholder_policy: config.placeholder_policy,
            users: UserStore::new(Arc::clone(&api), timeout),
            follows: FollowStore::new(Arc::clone(&api), timeout),
            tickets: TicketStore::new(Arc::clone(&api), timeout),
            ticket_types: TicketTypeStore::new(Arc::clone(&api), timeout),
            events: OrganizerEventStore::new(Arc::clone(&api), timeout),
            activities: ActivityStore::new(Arc::clone(&api), timeout),
            cart: Cart::load(storage),
            remote_cart: RemoteCart::new(Arc::clone(&api)),
            api,
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn follows(&self) -> &FollowStore {
        &self.follows
    }

    pub fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    pub fn ticket_types(&self) -> &TicketTypeStore {
        &self.ticket_types
    }

    pub fn events(&self) -> &OrganizerEventStore {
        &self.events
    }

    pub fn activities(&self) -> &ActivityStore {
        &self.activities
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn remote_cart(&self) -> &RemoteCart {
        &self.remote_cart
    }

    pub fn api(&self) -> &Arc<dyn TicketingApi> {
        &self.api
    }

    pub fn render_activity(
        &self,
        item: &ActivityItem,
        viewer_id: Option<UserId>,
    ) -> Result<Vec<Inline>, TemplateError> {
        template::render_activity(item, &self.users, viewer_id, self.placeholder_policy)
    }

    /// Loads the feed of `viewer_id`, bulk-fetches every user it mentions and
    /// renders each entry. Entries that fail under the strict policy are left out.
    pub async fn rendered_feed(&self, viewer_id: UserId) -> Result<Vec<RenderedActivity>, CacheError> {
        let items = self.activities.load_feed(viewer_id).await?;

        let mut segments = Vec::with_capacity(items.len());
        let mut user_ids = BTreeSet::new();
        for item in &items {
            match template::render(&item.template_text, item, self.placeholder_policy) {
                Ok(rendered) => {
                    user_ids.extend(template::referenced_users(&rendered));
                    segments.push(Some(rendered));
                }
                Err(error) => {
                    log::warn!(activity = item.id, error:% = error; "skipping activity");
                    segments.push(None);
                }
            }
        }

        let user_ids: Vec<UserId> = user_ids.into_iter().collect();
        self.users.cache().fetch_many(&user_ids).await;

        Ok(items
            .into_iter()
            .zip(segments)
            .filter_map(|(item, rendered)| {
                let inlines = template::resolve(&rendered?, &self.users, Some(viewer_id));
                Some(RenderedActivity { item, inlines })
            })
            .collect())
    }

    /// Adds tickets for `event_id` to the guest cart at the event's current
    /// price, loading the event first if needed.
    pub async fn add_to_cart(&self, event_id: EventId, quantity: u32) -> Result<CartItem, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }
        let event = self
            .events
            .ensure(event_id)
            .await?
            .ok_or(CartError::UnknownEvent(event_id))?;
        self.cart.add_item(&event, quantity)
    }

    /// Checks out the guest cart as `user_id` and drops the cached ticket list
    /// so it reloads with the new purchase.
    pub async fn checkout(&self, user_id: UserId) -> Result<Transaction, CartError> {
        let transaction = self.cart.checkout(self.api.as_ref()).await?;
        self.tickets.invalidate_user(user_id);
        Ok(transaction)
    }

    /// Forgets everything cached for the session. The guest cart survives.
    pub fn logout(&self) {
        self.users.clear();
        self.follows.clear();
        self.tickets.clear();
        self.ticket_types.clear();
        self.events.clear();
        self.activities.clear();
        self.remote_cart.reset();
        log::info!("session cleared");
    }
}
