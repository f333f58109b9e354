use crate::api::{found, ApiError, TicketingApi};
use crate::cache::{CacheConfig, CacheError, EntityCache, FnFetcher};
use crate::model::{Event, EventId, OrganizerId};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn sort_by_date(events: &mut [Event]) {
    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
}

/// Events by id and the events of each organizer.
#[derive(Clone)]
pub struct OrganizerEventStore {
    events: EntityCache<EventId, Event>,
    organizer_events: EntityCache<OrganizerId, Vec<Event>>,
}

impl OrganizerEventStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        let event_api = Arc::clone(&api);
        let events = EntityCache::new(
            Arc::new(FnFetcher::new(move |event_id: EventId| {
                let api = Arc::clone(&event_api);
                async move { found(api.get_event(event_id).await) }.boxed()
            })),
            CacheConfig::new("events").with_fetch_timeout(fetch_timeout),
        );

        let organizer_cache = events.clone();
        let organizer_events = EntityCache::with_hook(
            Arc::new(FnFetcher::new(move |organizer_id: OrganizerId| {
                let api = Arc::clone(&api);
                async move {
                    let Some(mut items) = found(api.get_organizer_events(organizer_id).await)?
                    else {
                        return Ok(None);
                    };
                    sort_by_date(&mut items);
                    Ok::<_, ApiError>(Some(items))
                }
                .boxed()
            })),
            CacheConfig::new("organizer_events").with_fetch_timeout(fetch_timeout),
            move |_: &OrganizerId, listed: &Vec<Event>| {
                organizer_cache.insert_many(listed.iter().map(|event| (event.id, event.clone())));
            },
        );

        OrganizerEventStore {
            events,
            organizer_events,
        }
    }

    pub fn get(&self, event_id: EventId) -> Option<Event> {
        self.events.get(&event_id)
    }

    pub async fn ensure(&self, event_id: EventId) -> Result<Option<Event>, CacheError> {
        self.events.ensure(&event_id).await
    }

    /// Events of `organizer_id`, earliest first. `None` until loaded.
    pub fn for_organizer(&self, organizer_id: OrganizerId) -> Option<Vec<Event>> {
        let listed = self.organizer_events.get(&organizer_id)?;
        Some(self.collect(&listed))
    }

    pub async fn load_for_organizer(
        &self,
        organizer_id: OrganizerId,
    ) -> Result<Vec<Event>, CacheError> {
        let listed = self
            .organizer_events
            .ensure(&organizer_id)
            .await?
            .unwrap_or_default();
        Ok(self.collect(&listed))
    }

    fn collect(&self, listed: &[Event]) -> Vec<Event> {
        let mut events: Vec<Event> = listed
            .iter()
            .filter_map(|event| self.events.peek(&event.id))
            .collect();
        sort_by_date(&mut events);
        events
    }

    /// Applies a local change, e.g. tickets sold after a checkout.
    pub fn update(&self, event_id: EventId, patch: impl FnOnce(&mut Event)) -> bool {
        self.events.update(&event_id, patch)
    }

    pub fn invalidate(&self, event_id: EventId) {
        self.events.invalidate(&event_id);
    }

    pub fn invalidate_organizer(&self, organizer_id: OrganizerId) {
        self.organizer_events.invalidate(&organizer_id);
    }

    pub fn clear(&self) {
        self.organizer_events.clear();
        self.events.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.events.subscribe()
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.organizer_events
            .last_error()
            .or_else(|| self.events.last_error())
    }
}
