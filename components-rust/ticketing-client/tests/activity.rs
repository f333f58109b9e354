mod common;

use common::{activity, eventually, user, MockApi};
use common_lib::MemoryStorage;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use ticketing_client::{
    ActivityError, ActivityStore, ClientConfig, PlaceholderPolicy, TicketingClient,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn seeded_api() -> Arc<MockApi> {
    let api = MockApi::new(1);
    let mut liked = activity(10, 2, "{user_name} liked {event_name}", 5);
    liked.event_title = Some("Jazz Night".to_string());
    liked.reference_id_1 = Some(101);
    liked.reaction_count = 4;

    let mut followed = activity(11, 2, "{user_name} started following {followed_user_name}", 30);
    followed.reference_id_1 = Some(1);

    let mut bought = activity(
        12,
        3,
        "{user_name} bought {ticket_quantity} ticket{ticket_quantity|plural:s}",
        10,
    );
    bought.ticket_quantity = Some(3);
    bought.has_liked = true;
    bought.reaction_count = 1;

    api.feeds
        .lock()
        .unwrap()
        .insert(1, vec![liked, followed, bought]);
    api.add_user(user(1, "Viewer", "One"));
    api.add_user(user(2, "Jane", "Doe"));
    api.add_user(user(3, "Sam", "Lee"));
    api
}

#[tokio::test]
async fn test_feed_sorted_and_seeded() {
    let api = seeded_api();
    let store = ActivityStore::new(api.clone(), TIMEOUT);

    let feed = store.load_feed(1).await.unwrap();

    let ids: Vec<_> = feed.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![11, 12, 10]);
    assert!(store.get(10).is_some());
    assert_eq!(api.calls("get_activity"), 0);
    assert_eq!(store.feed(1).unwrap().len(), 3);
}

#[tokio::test]
async fn test_like_and_unlike() {
    let api = seeded_api();
    let store = ActivityStore::new(api.clone(), TIMEOUT);
    store.load_feed(1).await.unwrap();

    store.like(10).await.unwrap();
    let item = store.get(10).unwrap();
    assert!(item.has_liked);
    assert_eq!(item.reaction_count, 5);

    store.like(10).await.unwrap();
    assert_eq!(api.calls("like_activity"), 1);

    assert!(!store.toggle_like(10).await.unwrap());
    let item = store.get(10).unwrap();
    assert!(!item.has_liked);
    assert_eq!(item.reaction_count, 4);
}

#[tokio::test]
async fn test_like_visible_before_confirmation() {
    let api = seeded_api();
    let store = ActivityStore::new(api.clone(), TIMEOUT);
    store.load_feed(1).await.unwrap();
    let gate = api.hold_writes();

    let task = tokio::spawn({
        let store = store.clone();
        async move { store.like(10).await }
    });
    eventually(|| api.calls("like_activity") == 1).await;

    assert!(store.get(10).unwrap().has_liked);

    gate.notify_one();
    task.await.unwrap().unwrap();
    assert_eq!(store.get(10).unwrap().reaction_count, 5);
}

#[tokio::test]
async fn test_failed_unlike_rolls_back() {
    let api = seeded_api();
    let store = ActivityStore::new(api.clone(), TIMEOUT);
    store.load_feed(1).await.unwrap();
    api.fail_writes.store(true, Ordering::SeqCst);

    let result = store.unlike(12).await;

    assert!(matches!(result, Err(ActivityError::Api(_))));
    let item = store.get(12).unwrap();
    assert!(item.has_liked);
    assert_eq!(item.reaction_count, 1);
}

#[tokio::test]
async fn test_comment() {
    let api = seeded_api();
    let store = ActivityStore::new(api.clone(), TIMEOUT);
    store.load_feed(1).await.unwrap();

    assert!(matches!(
        store.comment(10, "   ").await,
        Err(ActivityError::EmptyComment)
    ));
    assert!(matches!(
        store.comment(10, &"x".repeat(2001)).await,
        Err(ActivityError::CommentTooLong)
    ));
    assert_eq!(api.calls("add_comment"), 0);

    let comment = store.comment(10, "  see you there ").await.unwrap().unwrap();

    assert_eq!(comment.content, "see you there");
    assert_eq!(store.get(10).unwrap().comment_count, 1);
}

#[tokio::test]
async fn test_rendered_feed() {
    let api = seeded_api();
    let client = TicketingClient::with_parts(
        &ClientConfig::default(),
        api.clone(),
        Arc::new(MemoryStorage::new()),
    );

    let rendered = client.rendered_feed(1).await.unwrap();

    let texts: Vec<_> = rendered.iter().map(|entry| entry.plain_text()).collect();
    assert_eq!(
        texts,
        vec![
            "Jane Doe started following you",
            "Sam Lee bought 3 tickets",
            "Jane Doe liked Jazz Night",
        ]
    );
    assert_eq!(api.calls("get_users"), 1);
    assert_eq!(api.calls("get_user"), 0);
}

#[tokio::test]
async fn test_rendered_feed_placeholder_policy() {
    let api = seeded_api();
    let broken = activity(13, 3, "{user_name} reviewed {event_name}", 50);
    api.feeds.lock().unwrap().get_mut(&1).unwrap().push(broken);

    let lenient = TicketingClient::with_parts(
        &ClientConfig::default(),
        api.clone(),
        Arc::new(MemoryStorage::new()),
    );
    let rendered = lenient.rendered_feed(1).await.unwrap();
    assert_eq!(rendered.len(), 4);
    assert_eq!(rendered[0].plain_text(), "Sam Lee reviewed {event_name}");

    let strict_config = ClientConfig {
        placeholder_policy: PlaceholderPolicy::Strict,
        ..ClientConfig::default()
    };
    let strict =
        TicketingClient::with_parts(&strict_config, api.clone(), Arc::new(MemoryStorage::new()));
    let rendered = strict.rendered_feed(1).await.unwrap();
    assert_eq!(rendered.len(), 3);
    assert!(rendered.iter().all(|entry| entry.item.id != 13));
}

#[tokio::test]
async fn test_clear_drops_feed_still_loading() {
    let api = seeded_api();
    let gate = api.hold_reads();
    let store = ActivityStore::new(api.clone(), TIMEOUT);

    assert!(store.feed(1).is_none());
    eventually(|| api.calls("get_feed") == 1).await;

    store.clear();
    gate.notify_one();
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    assert!(store.get(11).is_none());
    assert!(store.feed(1).is_none());
    assert!(store.last_error().is_none());
}
