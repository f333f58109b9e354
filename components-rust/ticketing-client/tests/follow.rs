mod common;

use chrono::Utc;
use common::{eventually, user, MockApi};
use std::time::Duration;
use ticketing_client::model::FollowRelation;
use ticketing_client::{DisplayNames, FollowError, FollowStore, UserStore};

const TIMEOUT: Duration = Duration::from_secs(5);

fn relation(id: u64, follower_id: u64, followed_id: u64) -> FollowRelation {
    FollowRelation {
        id: Some(id),
        follower_id,
        followed_id,
        created_at: Utc::now(),
        updated_at: None,
    }
}

#[tokio::test]
async fn test_follow_visible_before_confirmation() {
    let api = MockApi::new(1);
    let gate = api.hold_writes();
    let follows = FollowStore::new(api.clone(), TIMEOUT);

    let task = tokio::spawn({
        let follows = follows.clone();
        async move { follows.follow(1, 2).await }
    });
    eventually(|| api.calls("follow_user") == 1).await;

    assert!(follows.is_following(1, 2));
    assert!(!follows.is_following(2, 1));
    let pending = follows.followers(2).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_confirmed());

    gate.notify_one();
    let confirmed = task.await.unwrap().unwrap();

    assert!(confirmed.is_confirmed());
    assert!(follows.is_following(1, 2));
    assert_eq!(follows.following(1).unwrap(), vec![confirmed.clone()]);
    assert_eq!(follows.followers(2).unwrap(), vec![confirmed]);
}

#[tokio::test]
async fn test_failed_follow_rolls_back() {
    let api = MockApi::new(1);
    api.following
        .lock()
        .unwrap()
        .insert(1, vec![relation(50, 1, 3)]);
    let follows = FollowStore::new(api.clone(), TIMEOUT);
    let before = follows.load_following(1).await.unwrap();

    api.fail_writes.store(true, std::sync::atomic::Ordering::SeqCst);
    let result = follows.follow(1, 2).await;

    assert!(matches!(result, Err(FollowError::Api(_))));
    assert!(!follows.is_following(1, 2));
    assert_eq!(follows.load_following(1).await.unwrap(), before);
    assert_eq!(follows.following_count(1), Some(1));
}

#[tokio::test]
async fn test_unfollow_and_rollback() {
    let api = MockApi::new(1);
    api.following
        .lock()
        .unwrap()
        .insert(1, vec![relation(60, 1, 2)]);
    api.followers
        .lock()
        .unwrap()
        .insert(2, vec![relation(60, 1, 2)]);
    let follows = FollowStore::new(api.clone(), TIMEOUT);
    follows.load_following(1).await.unwrap();
    follows.load_followers(2).await.unwrap();
    assert!(follows.is_following(1, 2));

    api.fail_writes.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(follows.unfollow(1, 2).await.is_err());
    assert!(follows.is_following(1, 2));
    assert_eq!(follows.follower_count(2), Some(1));

    api.fail_writes.store(false, std::sync::atomic::Ordering::SeqCst);
    follows.unfollow(1, 2).await.unwrap();
    assert!(!follows.is_following(1, 2));
    assert_eq!(follows.follower_count(2), Some(0));
    assert_eq!(follows.following_count(1), Some(0));
}

#[tokio::test]
async fn test_toggle_follow() {
    let api = MockApi::new(1);
    let follows = FollowStore::new(api.clone(), TIMEOUT);

    assert!(follows.toggle_follow(1, 4).await.unwrap());
    assert!(follows.is_following(1, 4));

    assert!(!follows.toggle_follow(1, 4).await.unwrap());
    assert!(!follows.is_following(1, 4));
    assert_eq!(api.calls("follow_user"), 1);
    assert_eq!(api.calls("unfollow_user"), 1);
}

#[tokio::test]
async fn test_follow_rejects_self_and_duplicates() {
    let api = MockApi::new(1);
    api.following
        .lock()
        .unwrap()
        .insert(1, vec![relation(70, 1, 2)]);
    let follows = FollowStore::new(api.clone(), TIMEOUT);

    assert!(matches!(follows.follow(1, 1).await, Err(FollowError::SelfFollow)));

    follows.load_following(1).await.unwrap();
    let existing = follows.follow(1, 2).await.unwrap();

    assert_eq!(existing.id, Some(70));
    assert_eq!(api.calls("follow_user"), 0);
}

#[tokio::test]
async fn test_expand_relations_fetches_users_once() {
    let api = MockApi::new(1);
    api.add_user(user(1, "Ada", "Lovelace"));
    api.add_user(user(2, "Grace", "Hopper"));
    api.add_user(user(3, "Alan", "Turing"));
    let users = UserStore::new(api.clone(), TIMEOUT);

    users
        .expand_relations(&[relation(1, 1, 2), relation(2, 3, 2), relation(3, 1, 3)])
        .await;

    assert_eq!(api.calls("get_users"), 1);
    assert_eq!(api.calls("get_user"), 0);
    assert_eq!(users.display_name(2), "Grace Hopper");
    assert_eq!(users.display_name(3), "Alan Turing");
    assert_eq!(users.display_name(99), "User 99");
}

#[tokio::test]
async fn test_follow_during_list_load_keeps_existing_follows() {
    let api = MockApi::new(1);
    api.following
        .lock()
        .unwrap()
        .insert(1, vec![relation(50, 1, 3)]);
    let gate = api.hold_reads();
    let follows = FollowStore::new(api.clone(), TIMEOUT);

    assert!(follows.following(1).is_none());
    eventually(|| api.calls("get_following") == 1).await;

    // Later reads go straight through; the first one stays parked
    *api.read_gate.lock().unwrap() = None;
    follows.follow(1, 2).await.unwrap();
    eventually(|| follows.following_count(1) == Some(2)).await;

    gate.notify_waiters();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    assert_eq!(follows.following_count(1), Some(2));
    assert!(follows.is_following(1, 3));
    assert!(follows.is_following(1, 2));
    assert!(follows
        .following(1)
        .unwrap()
        .iter()
        .all(FollowRelation::is_confirmed));
    assert_eq!(api.calls("get_following"), 2);
}
