//! Guest cart kept on the device.
//!
//! Every mutation rewrites the whole item list under the `cart` storage key
//! as a versioned snapshot. A payload that cannot be decoded on load yields
//! an empty cart.

pub mod remote;

use crate::api::{ApiError, NewTransaction, TicketingApi, TransactionLine};
use crate::cache::CacheError;
use crate::model::{Event, EventId, Transaction};
use chrono::{DateTime, Utc};
use common_lib::snapshot;
use common_lib::KeyValueStorage;
use schemars::{schema_for, JsonSchema, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

pub const CART_STORAGE_KEY: &str = "cart";

const BADGE_LIMIT: u32 = 9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub event_id: EventId,
    pub event_title: String,
    pub event_date: DateTime<Utc>,
    pub event_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_image: Option<String>,
    pub quantity: u32,
    pub price: f64,
    pub total_price: f64,
}

impl CartItem {
    fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.total_price = f64::from(quantity) * self.price;
    }
}

#[derive(Debug, Error)]
pub enum CartError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),
    #[error("cart item not found: {0}")]
    ItemNotFound(String),
    #[error("cart is empty")]
    Empty,
    #[error("event {0} does not exist")]
    UnknownEvent(EventId),
    #[error("event lookup failed: {0}")]
    Lookup(#[from] CacheError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// JSON schema of the persisted item list.
pub fn snapshot_schema() -> Schema {
    schema_for!(Vec<CartItem>)
}

struct CartInner {
    storage: Arc<dyn KeyValueStorage>,
    items: Mutex<Vec<CartItem>>,
    revision: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct Cart {
    inner: Arc<CartInner>,
}

impl Cart {
    /// Restores the cart saved in `storage`, or starts empty.
    pub fn load(storage: Arc<dyn KeyValueStorage>) -> Self {
        let items = match storage.get(CART_STORAGE_KEY) {
            Ok(Some(bytes)) => match snapshot::deserialize::<Vec<CartItem>>(&bytes) {
                Ok(items) => {
                    log::debug!(items = items.len(); "cart restored");
                    items
                }
                Err(error) => {
                    log::warn!(error:% = error; "discarding unreadable cart");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(error) => {
                log::warn!(error:% = error; "cart storage unavailable");
                Vec::new()
            }
        };

        let (revision, _) = watch::channel(0);
        Cart {
            inner: Arc::new(CartInner {
                storage,
                items: Mutex::new(items),
                revision,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CartItem>> {
        self.inner.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes `items` and notifies subscribers. The caller still holds the
    /// lock so writes land in mutation order.
    fn commit(&self, items: &[CartItem]) {
        let result = snapshot::serialize(items)
            .map_err(|error| error.to_string())
            .and_then(|bytes| {
                self.inner
                    .storage
                    .set(CART_STORAGE_KEY, &bytes)
                    .map_err(|error| error.to_string())
            });

        if let Err(error) = result {
            log::warn!(error:% = error; "failed to persist cart");
        }
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    /// Adds `quantity` tickets for `event`. An existing line for the event is
    /// topped up instead of duplicated.
    pub fn add_item(&self, event: &Event, quantity: u32) -> Result<CartItem, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }

        let mut items = self.lock();
        let item = match items.iter_mut().find(|item| item.event_id == event.id) {
            Some(item) => {
                item.set_quantity(item.quantity.saturating_add(quantity));
                item.clone()
            }
            None => {
                let item = CartItem {
                    id: format!("{}-{}", event.id, Utc::now().timestamp_millis()),
                    event_id: event.id,
                    event_title: event.title.clone(),
                    event_date: event.date,
                    event_location: event.location.clone(),
                    event_image: event.image.clone(),
                    quantity,
                    price: event.price,
                    total_price: f64::from(quantity) * event.price,
                };
                items.push(item.clone());
                item
            }
        };

        self.commit(&items);
        log::debug!(event = event.id, quantity = item.quantity; "cart item added");
        Ok(item)
    }

    /// Sets the quantity of `item_id`; zero or less removes the item.
    pub fn update_quantity(&self, item_id: &str, quantity: i64) -> Result<(), CartError> {
        let mut items = self.lock();
        let Some(position) = items.iter().position(|item| item.id == item_id) else {
            return Err(CartError::ItemNotFound(item_id.to_string()));
        };

        if quantity <= 0 {
            items.remove(position);
        } else {
            let quantity =
                u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity(quantity))?;
            items[position].set_quantity(quantity);
        }

        self.commit(&items);
        Ok(())
    }

    pub fn remove_item(&self, item_id: &str) -> Option<CartItem> {
        let mut items = self.lock();
        let position = items.iter().position(|item| item.id == item_id)?;
        let removed = items.remove(position);
        self.commit(&items);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut items = self.lock();
        items.clear();
        self.commit(&items);
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.lock().clone()
    }

    pub fn get(&self, item_id: &str) -> Option<CartItem> {
        self.lock().iter().find(|item| item.id == item_id).cloned()
    }

    pub fn is_in_cart(&self, event_id: EventId) -> bool {
        self.lock().iter().any(|item| item.event_id == event_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn total(&self) -> f64 {
        self.lock().iter().map(|item| item.total_price).sum()
    }

    /// Number of tickets, not lines.
    pub fn item_count(&self) -> u32 {
        self.lock().iter().map(|item| item.quantity).sum()
    }

    /// Count shown on the cart icon: nothing when empty, capped at `9+`.
    pub fn badge_label(&self) -> Option<String> {
        match self.item_count() {
            0 => None,
            count if count > BADGE_LIMIT => Some(format!("{BADGE_LIMIT}+")),
            count => Some(count.to_string()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Submits one transaction for every line. On success the submitted
    /// quantities are taken out of the cart. Tickets added while the request
    /// was running stay, whether on a new line or topping up a submitted one.
    pub async fn checkout(&self, api: &dyn TicketingApi) -> Result<Transaction, CartError> {
        let items = self.items();
        if items.is_empty() {
            return Err(CartError::Empty);
        }

        let request = NewTransaction {
            items: items
                .iter()
                .map(|item| TransactionLine {
                    event_id: item.event_id,
                    quantity: item.quantity,
                    unit_price: item.price,
                })
                .collect(),
            amount: items.iter().map(|item| item.total_price).sum(),
        };

        let transaction = match api.create_transaction(&request).await {
            Ok(transaction) => transaction,
            Err(error) => {
                log::warn!(lines = items.len(), error:% = error; "checkout failed");
                return Err(error.into());
            }
        };

        let submitted: HashMap<&str, u32> = items
            .iter()
            .map(|item| (item.id.as_str(), item.quantity))
            .collect();
        {
            let mut current = self.lock();
            current.retain_mut(|item| match submitted.get(item.id.as_str()) {
                Some(&bought) if item.quantity > bought => {
                    item.set_quantity(item.quantity - bought);
                    true
                }
                Some(_) => false,
                None => true,
            });
            self.commit(&current);
        }

        log::info!(transaction = transaction.id, amount = request.amount; "checkout complete");
        Ok(transaction)
    }
}
