use crate::api::{found, TicketingApi};
use crate::cache::{CacheConfig, CacheError, EntityCache, FnFetcher};
use crate::model::{EventId, Ticket, TicketId, TicketType, TicketTypeId, UserId};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Tickets by id, plus the tickets owned by each user.
#[derive(Clone)]
pub struct TicketStore {
    tickets: EntityCache<TicketId, Ticket>,
    user_tickets: EntityCache<UserId, Vec<Ticket>>,
}

impl TicketStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        let ticket_api = Arc::clone(&api);
        let tickets = EntityCache::new(
            Arc::new(FnFetcher::new(move |ticket_id: TicketId| {
                let api = Arc::clone(&ticket_api);
                async move { found(api.get_ticket(ticket_id).await) }.boxed()
            })),
            CacheConfig::new("tickets").with_fetch_timeout(fetch_timeout),
        );

        let owned_tickets = tickets.clone();
        let user_tickets = EntityCache::with_hook(
            Arc::new(FnFetcher::new(move |user_id: UserId| {
                let api = Arc::clone(&api);
                async move { found(api.get_user_tickets(user_id).await) }.boxed()
            })),
            CacheConfig::new("user_tickets").with_fetch_timeout(fetch_timeout),
            move |_: &UserId, owned: &Vec<Ticket>| {
                owned_tickets.insert_many(owned.iter().map(|ticket| (ticket.id, ticket.clone())));
            },
        );

        TicketStore {
            tickets,
            user_tickets,
        }
    }

    pub fn get(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.tickets.get(&ticket_id)
    }

    pub async fn ensure(&self, ticket_id: TicketId) -> Result<Option<Ticket>, CacheError> {
        self.tickets.ensure(&ticket_id).await
    }

    /// Tickets owned by `user_id` in server order. `None` until loaded.
    pub fn user_tickets(&self, user_id: UserId) -> Option<Vec<Ticket>> {
        let owned = self.user_tickets.get(&user_id)?;
        Some(self.collect(&owned))
    }

    pub async fn load_user_tickets(&self, user_id: UserId) -> Result<Vec<Ticket>, CacheError> {
        let owned = self.user_tickets.ensure(&user_id).await?.unwrap_or_default();
        Ok(self.collect(&owned))
    }

    pub async fn refresh_user_tickets(&self, user_id: UserId) -> Result<Vec<Ticket>, CacheError> {
        let owned = self.user_tickets.refresh(&user_id).await?.unwrap_or_default();
        Ok(self.collect(&owned))
    }

    fn collect(&self, owned: &[Ticket]) -> Vec<Ticket> {
        owned
            .iter()
            .filter_map(|ticket| self.tickets.peek(&ticket.id))
            .collect()
    }

    /// Number of tickets (not orders) `user_id` holds for `event_id`, from cache.
    pub fn quantity_for_event(&self, user_id: UserId, event_id: EventId) -> u32 {
        self.user_tickets
            .peek(&user_id)
            .map(|owned| {
                self.collect(&owned)
                    .iter()
                    .filter(|ticket| ticket.event_id == event_id)
                    .map(|ticket| ticket.quantity)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Drops the owned list so the next read refetches it, e.g. after checkout.
    pub fn invalidate_user(&self, user_id: UserId) {
        self.user_tickets.invalidate(&user_id);
    }

    pub fn clear(&self) {
        self.user_tickets.clear();
        self.tickets.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tickets.subscribe()
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.user_tickets
            .last_error()
            .or_else(|| self.tickets.last_error())
    }
}

/// Ticket types offered for each event.
#[derive(Clone)]
pub struct TicketTypeStore {
    ticket_types: EntityCache<EventId, Vec<TicketType>>,
}

impl TicketTypeStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        let fetcher = FnFetcher::new(move |event_id: EventId| {
            let api = Arc::clone(&api);
            async move { found(api.get_ticket_types(event_id).await) }.boxed()
        });

        TicketTypeStore {
            ticket_types: EntityCache::new(
                Arc::new(fetcher),
                CacheConfig::new("ticket_types").with_fetch_timeout(fetch_timeout),
            ),
        }
    }

    pub fn for_event(&self, event_id: EventId) -> Option<Vec<TicketType>> {
        self.ticket_types.get(&event_id)
    }

    pub async fn load(&self, event_id: EventId) -> Result<Vec<TicketType>, CacheError> {
        Ok(self.ticket_types.ensure(&event_id).await?.unwrap_or_default())
    }

    pub fn find(&self, event_id: EventId, ticket_type_id: TicketTypeId) -> Option<TicketType> {
        self.ticket_types
            .peek(&event_id)?
            .into_iter()
            .find(|ticket_type| ticket_type.id == ticket_type_id)
    }

    /// Cheapest type that still has tickets left.
    pub fn cheapest_available(&self, event_id: EventId) -> Option<TicketType> {
        self.ticket_types
            .peek(&event_id)?
            .into_iter()
            .filter(|ticket_type| ticket_type.quantity_available > 0)
            .min_by(|a, b| a.price.total_cmp(&b.price))
    }

    pub fn invalidate(&self, event_id: EventId) {
        self.ticket_types.invalidate(&event_id);
    }

    pub fn clear(&self) {
        self.ticket_types.clear();
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.ticket_types.last_error()
    }
}
