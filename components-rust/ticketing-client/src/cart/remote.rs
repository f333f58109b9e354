//! Cart of a signed-in user, held by the backend.

use super::CartError;
use crate::api::{AddCartItem, TicketingApi};
use crate::model::{EventId, ServerCartItem, TicketTypeId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Local mirror of the server cart. Each operation goes to the API first and
/// only touches the mirror once the call succeeded; errors reach the caller.
#[derive(Clone)]
pub struct RemoteCart {
    api: Arc<dyn TicketingApi>,
    items: Arc<Mutex<Vec<ServerCartItem>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl RemoteCart {
    pub fn new(api: Arc<dyn TicketingApi>) -> Self {
        let (revision, _) = watch::channel(0);
        RemoteCart {
            api,
            items: Arc::new(Mutex::new(Vec::new())),
            revision: Arc::new(revision),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ServerCartItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn changed(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub async fn refresh(&self) -> Result<Vec<ServerCartItem>, CartError> {
        let items = self.api.get_cart().await?;
        *self.lock() = items.clone();
        self.changed();
        Ok(items)
    }

    /// Adds a line. When the backend answers without the created line the
    /// whole cart is reloaded.
    pub async fn add(
        &self,
        event_id: EventId,
        ticket_type_id: Option<TicketTypeId>,
        quantity: u32,
    ) -> Result<Vec<ServerCartItem>, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }

        let request = AddCartItem {
            event_id,
            ticket_type_id,
            quantity,
        };
        match self.api.add_cart_item(&request).await? {
            Some(created) => {
                {
                    let mut items = self.lock();
                    match items.iter_mut().find(|item| item.id == created.id) {
                        Some(existing) => *existing = created,
                        None => items.push(created),
                    }
                }
                self.changed();
                Ok(self.items())
            }
            None => self.refresh().await,
        }
    }

    /// Zero or less removes the line, as in the guest cart.
    pub async fn update_quantity(&self, item_id: u64, quantity: i64) -> Result<(), CartError> {
        if quantity <= 0 {
            return self.remove(item_id).await;
        }
        let quantity =
            u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity(quantity))?;

        let updated = self.api.update_cart_item(item_id, quantity).await?;
        {
            let mut items = self.lock();
            if let Some(item) = items.iter_mut().find(|item| item.id == item_id) {
                match updated {
                    Some(updated) => *item = updated,
                    None => item.quantity = quantity,
                }
            }
        }
        self.changed();
        Ok(())
    }

    pub async fn remove(&self, item_id: u64) -> Result<(), CartError> {
        self.api.remove_cart_item(item_id).await?;
        self.lock().retain(|item| item.id != item_id);
        self.changed();
        Ok(())
    }

    pub fn items(&self) -> Vec<ServerCartItem> {
        self.lock().clone()
    }

    pub fn total(&self) -> f64 {
        self.lock().iter().map(ServerCartItem::total_price).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.lock().iter().map(|item| item.quantity).sum()
    }

    /// Forgets the mirror without touching the server, e.g. on logout.
    pub fn reset(&self) {
        self.lock().clear();
        self.changed();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
