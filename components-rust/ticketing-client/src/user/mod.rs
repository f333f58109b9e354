use crate::api::{found, ApiError, TicketingApi};
use crate::cache::{CacheConfig, CacheError, EntityCache, EntityFetcher, FnFetcher};
use crate::model::{fallback_display_name, FollowRelation, UserId, UserProfile};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Anything that can turn a user id into a human readable name.
pub trait DisplayNames {
    fn display_name(&self, user_id: UserId) -> String;
}

impl DisplayNames for HashMap<UserId, UserProfile> {
    fn display_name(&self, user_id: UserId) -> String {
        self.get(&user_id)
            .map(UserProfile::display_name)
            .unwrap_or_else(|| fallback_display_name(user_id))
    }
}

struct UserFetcher {
    api: Arc<dyn TicketingApi>,
}

#[async_trait]
impl EntityFetcher<UserId, UserProfile> for UserFetcher {
    async fn fetch(&self, key: &UserId) -> Result<Option<UserProfile>, ApiError> {
        found(self.api.get_user(*key).await)
    }

    async fn fetch_many(&self, keys: &[UserId]) -> Result<Vec<(UserId, UserProfile)>, ApiError> {
        let users = self.api.get_users(keys).await?;
        Ok(users.into_iter().map(|user| (user.id, user)).collect())
    }
}

#[derive(Clone)]
pub struct UserStore {
    users: EntityCache<UserId, UserProfile>,
}

impl UserStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        UserStore {
            users: EntityCache::new(
                Arc::new(UserFetcher { api }),
                CacheConfig::new("users").with_fetch_timeout(fetch_timeout),
            ),
        }
    }

    pub fn get(&self, user_id: UserId) -> Option<UserProfile> {
        self.users.get(&user_id)
    }

    pub async fn ensure(&self, user_id: UserId) -> Result<Option<UserProfile>, CacheError> {
        self.users.ensure(&user_id).await
    }

    /// Bulk-loads every user on either end of `relations`.
    pub async fn expand_relations(&self, relations: &[FollowRelation]) {
        let user_ids: Vec<UserId> = relations
            .iter()
            .flat_map(|relation| [relation.follower_id, relation.followed_id])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.users.fetch_many(&user_ids).await;
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.users.invalidate(&user_id);
    }

    pub fn clear(&self) {
        self.users.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.users.subscribe()
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.users.last_error()
    }

    pub fn cache(&self) -> &EntityCache<UserId, UserProfile> {
        &self.users
    }
}

impl DisplayNames for UserStore {
    /// Falls back to `User {id}` until the profile has been fetched.
    fn display_name(&self, user_id: UserId) -> String {
        self.get(user_id)
            .map(|user| user.display_name())
            .unwrap_or_else(|| fallback_display_name(user_id))
    }
}

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("users cannot follow themselves")]
    SelfFollow,
    #[error(transparent)]
    Api(#[from] ApiError),
}

fn relation_list_cache(
    api: Arc<dyn TicketingApi>,
    name: &'static str,
    followers: bool,
    fetch_timeout: Duration,
) -> EntityCache<UserId, Vec<FollowRelation>> {
    let fetcher = FnFetcher::new(move |user_id: UserId| {
        let api = Arc::clone(&api);
        async move {
            if followers {
                found(api.get_followers(user_id).await)
            } else {
                found(api.get_following(user_id).await)
            }
        }
        .boxed()
    });

    EntityCache::new(
        Arc::new(fetcher),
        CacheConfig::new(name).with_fetch_timeout(fetch_timeout),
    )
}

/// Follower and following lists per user, with optimistic follow/unfollow.
#[derive(Clone)]
pub struct FollowStore {
    api: Arc<dyn TicketingApi>,
    followers: EntityCache<UserId, Vec<FollowRelation>>,
    following: EntityCache<UserId, Vec<FollowRelation>>,
}

impl FollowStore {
    pub fn new(api: Arc<dyn TicketingApi>, fetch_timeout: Duration) -> Self {
        FollowStore {
            followers: relation_list_cache(api.clone(), "followers", true, fetch_timeout),
            following: relation_list_cache(api.clone(), "following", false, fetch_timeout),
            api,
        }
    }

    /// Relations pointing at `user_id`.
    pub fn followers(&self, user_id: UserId) -> Option<Vec<FollowRelation>> {
        self.followers.get(&user_id)
    }

    /// Relations starting at `user_id`.
    pub fn following(&self, user_id: UserId) -> Option<Vec<FollowRelation>> {
        self.following.get(&user_id)
    }

    pub async fn load_followers(
        &self,
        user_id: UserId,
    ) -> Result<Vec<FollowRelation>, CacheError> {
        Ok(self.followers.ensure(&user_id).await?.unwrap_or_default())
    }

    pub async fn load_following(
        &self,
        user_id: UserId,
    ) -> Result<Vec<FollowRelation>, CacheError> {
        Ok(self.following.ensure(&user_id).await?.unwrap_or_default())
    }

    pub fn follower_count(&self, user_id: UserId) -> Option<usize> {
        self.followers(user_id).map(|relations| relations.len())
    }

    pub fn following_count(&self, user_id: UserId) -> Option<usize> {
        self.following(user_id).map(|relations| relations.len())
    }

    /// Answers from whichever side of the relation is cached, without fetching.
    pub fn is_following(&self, viewer_id: UserId, user_id: UserId) -> bool {
        let in_following = self
            .following
            .peek(&viewer_id)
            .is_some_and(|list| list.iter().any(|r| r.connects(viewer_id, user_id)));

        in_following
            || self
                .followers
                .peek(&user_id)
                .is_some_and(|list| list.iter().any(|r| r.connects(viewer_id, user_id)))
    }

    pub async fn follow(
        &self,
        viewer_id: UserId,
        user_id: UserId,
    ) -> Result<FollowRelation, FollowError> {
        if viewer_id == user_id {
            return Err(FollowError::SelfFollow);
        }
        if let Some(existing) = self.existing_relation(viewer_id, user_id) {
            return Ok(existing);
        }

        let provisional = FollowRelation::provisional(viewer_id, user_id);
        let following_known = self.following.contains(&viewer_id);
        let followers_known = self.followers.contains(&user_id);

        let add = |list: &mut Option<Vec<FollowRelation>>| {
            let list = list.get_or_insert_with(Vec::new);
            if !list.iter().any(|r| r.connects(viewer_id, user_id)) {
                list.push(provisional.clone());
            }
        };
        let following_write = self.following.mutate_optimistic(viewer_id, add);
        let followers_write = self.followers.mutate_optimistic(user_id, add);

        match self.api.follow_user(user_id).await {
            Ok(confirmed) => {
                self.following.confirm(following_write);
                self.followers.confirm(followers_write);

                let relation = confirmed.unwrap_or(provisional);
                let replace = |list: &mut Vec<FollowRelation>| {
                    for r in list.iter_mut() {
                        if r.connects(viewer_id, user_id) {
                            *r = relation.clone();
                        }
                    }
                };
                self.following.update(&viewer_id, replace);
                self.followers.update(&user_id, replace);

                // Lists that were never loaded only hold the new relation so far
                if !following_known {
                    self.following.revalidate(&viewer_id);
                }
                if !followers_known {
                    self.followers.revalidate(&user_id);
                }

                log::info!(follower = viewer_id, followed = user_id; "follow confirmed");
                Ok(relation)
            }
            Err(error) => {
                log::warn!(follower = viewer_id, followed = user_id, error:% = error; "follow failed");
                self.following.rollback(following_write);
                self.followers.rollback(followers_write);
                Err(error.into())
            }
        }
    }

    pub async fn unfollow(&self, viewer_id: UserId, user_id: UserId) -> Result<(), FollowError> {
        if viewer_id == user_id {
            return Err(FollowError::SelfFollow);
        }

        let remove = |list: &mut Option<Vec<FollowRelation>>| {
            if let Some(list) = list {
                list.retain(|r| !r.connects(viewer_id, user_id));
            }
        };
        let following_write = self.following.mutate_optimistic(viewer_id, remove);
        let followers_write = self.followers.mutate_optimistic(user_id, remove);

        match self.api.unfollow_user(user_id).await {
            Ok(()) => {
                self.following.confirm(following_write);
                self.followers.confirm(followers_write);
                log::info!(follower = viewer_id, followed = user_id; "unfollow confirmed");
                Ok(())
            }
            Err(error) => {
                log::warn!(follower = viewer_id, followed = user_id, error:% = error; "unfollow failed");
                self.following.rollback(following_write);
                self.followers.rollback(followers_write);
                Err(error.into())
            }
        }
    }

    pub async fn toggle_follow(
        &self,
        viewer_id: UserId,
        user_id: UserId,
    ) -> Result<bool, FollowError> {
        if self.is_following(viewer_id, user_id) {
            self.unfollow(viewer_id, user_id).await.map(|_| false)
        } else {
            self.follow(viewer_id, user_id).await.map(|_| true)
        }
    }

    fn existing_relation(&self, viewer_id: UserId, user_id: UserId) -> Option<FollowRelation> {
        self.following
            .peek(&viewer_id)
            .into_iter()
            .chain(self.followers.peek(&user_id))
            .flatten()
            .find(|r| r.connects(viewer_id, user_id))
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.followers.invalidate(&user_id);
        self.following.invalidate(&user_id);
    }

    pub fn clear(&self) {
        self.followers.clear();
        self.following.clear();
    }

    pub fn last_error(&self) -> Option<CacheError> {
        self.followers
            .last_error()
            .or_else(|| self.following.last_error())
    }
}
