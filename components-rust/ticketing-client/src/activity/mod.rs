pub mod template;

use crate::api::{found, ApiError, TicketingApi};
use crate::cache::{CacheConfig, CacheError, EntityCache, FnFetcher};
use crate::model::{ActivityId, ActivityItem, Comment, UserId};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

const MAX_COMMENT_LENGTH: usize = 2000;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("comment is empty")]
    EmptyComment,
    #[error("comment exceeds {} characters", MAX_COMMENT_LENGTH)]
    CommentTooLong,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Newest first; ties broken by id so the order is stable.
fn sort_newest_first(items: &mut [ActivityItem]) {
    items.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Activity entries by id plus the feed of each user. Feed entries are read
/// back through the per-activity cache so likes and comments show up.
#[derive(Clone)]
pub struct ActivityStore {
    api: Arc<dyn TicketingApi>,
    activities: EntityCache<ActivityId, ActivityItem>,
    feeds: EntityCache<UserId, Vec<ActivityItem>>,
}

impl ActivityStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        let activity_api = Arc::clone(&api);
        let activities = EntityCache::new(
            Arc::new(FnFetcher::new(move |activity_id: ActivityId| {
                let api = Arc::clone(&activity_api);
                async move { found(api.get_activity(activity_id).await) }.boxed()
            })),
            CacheConfig::new("activities").with_fetch_timeout(fetch_timeout),
        );

        let feed_api = Arc::clone(&api);
        let feed_activities = activities.clone();
        let feeds = EntityCache::with_hook(
            Arc::new(FnFetcher::new(move |user_id: UserId| {
                let api = Arc::clone(&feed_api);
                async move {
                    let Some(mut items) = found(api.get_feed(user_id).await)? else {
                        return Ok(None);
                    };
                    sort_newest_first(&mut items);
                    Ok::<_, ApiError>(Some(items))
                }
                .boxed()
            })),
            CacheConfig::new("feeds").with_fetch_timeout(fetch_timeout),
            move |_: &UserId, items: &Vec<ActivityItem>| {
                feed_activities.insert_many(items.iter().map(|item| (item.id, item.clone())));
            },
        );

        ActivityStore {
            api,
            activities,
            feeds,
        }
    }

    pub fn get(&self, activity_id: ActivityId) -> Option<ActivityItem> {
        self.activities.get(&activity_id)
    }

    /// Feed of `user_id`, newest first. `None` until the first load finished.
    pub fn feed(&self, user_id: UserId) -> Option<Vec<ActivityItem>> {
        let listed = self.feeds.get(&user_id)?;
        Some(self.collect(&listed))
    }

    pub async fn load_feed(&self, user_id: UserId) -> Result<Vec<ActivityItem>, CacheError> {
        let listed = self.feeds.ensure(&user_id).await?.unwrap_or_default();
        Ok(self.collect(&listed))
    }

    pub async fn refresh_feed(&self, user_id: UserId) -> Result<Vec<ActivityItem>, CacheError> {
        let listed = self.feeds.refresh(&user_id).await?.unwrap_or_default();
        Ok(self.collect(&listed))
    }

    fn collect(&self, listed: &[ActivityItem]) -> Vec<ActivityItem> {
        let mut items: Vec<ActivityItem> = listed
            .iter()
            .filter_map(|item| self.activities.peek(&item.id))
            .collect();
        sort_newest_first(&mut items);
        items
    }

    pub async fn like(&self, activity_id: ActivityId) -> Result<(), ActivityError> {
        if self
            .activities
            .peek(&activity_id)
            .is_some_and(|item| item.has_liked)
        {
            return Ok(());
        }

        let api = Arc::clone(&self.api);
        self.activities
            .apply_optimistic(
                activity_id,
                |item| {
                    if let Some(item) = item {
                        item.has_liked = true;
                        item.reaction_count += 1;
                    }
                },
                async move { api.like_activity(activity_id).await },
            )
            .await?;
        log::debug!(activity = activity_id; "liked");
        Ok(())
    }

    pub async fn unlike(&self, activity_id: ActivityId) -> Result<(), ActivityError> {
        if self
            .activities
            .peek(&activity_id)
            .is_some_and(|item| !item.has_liked)
        {
            return Ok(());
        }

        let api = Arc::clone(&self.api);
        self.activities
            .apply_optimistic(
                activity_id,
                |item| {
                    if let Some(item) = item {
                        item.has_liked = false;
                        item.reaction_count = item.reaction_count.saturating_sub(1);
                    }
                },
                async move { api.unlike_activity(activity_id).await },
            )
            .await?;
        log::debug!(activity = activity_id; "unliked");
        Ok(())
    }

    /// Returns whether the activity is liked afterwards.
    pub async fn toggle_like(&self, activity_id: ActivityId) -> Result<bool, ActivityError> {
        let liked = self
            .activities
            .peek(&activity_id)
            .is_some_and(|item| item.has_liked);

        if liked {
            self.unlike(activity_id).await.map(|_| false)
        } else {
            self.like(activity_id).await.map(|_| true)
        }
    }

    pub async fn comment(
        &self,
        activity_id: ActivityId,
        content: &str,
    ) -> Result<Option<Comment>, ActivityError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ActivityError::EmptyComment);
        }
        if content.chars().count() > MAX_COMMENT_LENGTH {
            return Err(ActivityError::CommentTooLong);
        }

        let api = Arc::clone(&self.api);
        let content = content.to_string();
        let comment = self
            .activities
            .apply_optimistic(
                activity_id,
                |item| {
                    if let Some(item) = item {
                        item.comment_count += 1;
                    }
                },
                async move { api.add_comment(activity_id, &content).await },
            )
            .await?;
        Ok(comment)
    }

    pub fn invalidate_feed(&self, user_id: UserId) {
        self.feeds.invalidate(&user_id);
    }

    pub fn clear(&self) {
        self.feeds.clear();
        self.activities.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.activities.subscribe()
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.feeds
            .last_error()
            .or_else(|| self.activities.last_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(id: ActivityId, minute: u32) -> ActivityItem {
        let mut item = ActivityItem::new(id, "{user_name} did something");
        item.modified_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
        item
    }

    #[test]
    fn test_sort_newest_first() {
        let mut items = vec![item(1, 5), item(2, 30), item(3, 5), item(4, 10)];

        sort_newest_first(&mut items);

        let ids: Vec<_> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }
}
