use super::{AddCartItem, ApiError, ApiResult, NewTransaction, TicketingApi};
use crate::model::{
    ActivityId, ActivityItem, Comment, Event, EventId, FollowRelation, OrganizerId,
    ServerCartItem, Ticket, TicketId, TicketType, Transaction, UserId, UserProfile,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 200;

pub struct HttpTicketingApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpTicketingApi {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(HttpTicketingApi {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.auth_token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => log::warn!("auth token is not a valid header value, sending anonymously"),
            }
        }
        headers
    }

    fn transport_error(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Transport(error.to_string())
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ApiResult<Vec<u8>> {
        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .headers(self.headers());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;

        log::debug!(method = method.as_str(), path = path, status = status.as_u16(); "api request");

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(status, &bytes),
            })
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let bytes = self.send(Method::GET, path, None).await?;
        decode(&bytes)
    }

    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ApiResult<Option<T>> {
        let bytes = self.send(method, path, body).await?;
        decode_optional(&bytes)
    }

    async fn write_empty(&self, method: Method, path: &str) -> ApiResult<()> {
        self.send(method, path, None).await.map(|_| ())
    }
}

fn to_body<T: Serialize>(value: &T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Mutation responses are either the affected record or a bare acknowledgement
/// (empty body, `null`, or `{"success": ...}` / `{"message": ...}` without an id).
fn decode_optional<T: DeserializeOwned>(bytes: &[u8]) -> ApiResult<Option<T>> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))?;

    let acknowledgement = match &value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => {
            !map.contains_key("id") && (map.contains_key("success") || map.contains_key("message"))
        }
        _ => false,
    };

    if acknowledgement {
        Ok(None)
    } else {
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn error_message(status: StatusCode, bytes: &[u8]) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(bytes) {
        for key in ["error", "message"] {
            if let Some(serde_json::Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }

    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text.chars().take(MAX_ERROR_BODY).collect()
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl TicketingApi for HttpTicketingApi {
    async fn get_user(&self, user_id: UserId) -> ApiResult<UserProfile> {
        self.get(&format!("/users/{user_id}")).await
    }

    async fn get_users(&self, user_ids: &[UserId]) -> ApiResult<Vec<UserProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.get(&format!("/users?ids={}", join_ids(user_ids))).await
    }

    async fn get_followers(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>> {
        self.get(&format!("/users/{user_id}/followers")).await
    }

    async fn get_following(&self, user_id: UserId) -> ApiResult<Vec<FollowRelation>> {
        self.get(&format!("/users/{user_id}/following")).await
    }

    async fn follow_user(&self, user_id: UserId) -> ApiResult<Option<FollowRelation>> {
        self.write(Method::POST, &format!("/users/{user_id}/follow"), None)
            .await
    }

    async fn unfollow_user(&self, user_id: UserId) -> ApiResult<()> {
        self.write_empty(Method::DELETE, &format!("/users/{user_id}/follow"))
            .await
    }

    async fn get_event(&self, event_id: EventId) -> ApiResult<Event> {
        self.get(&format!("/events/{event_id}")).await
    }

    async fn get_organizer_events(&self, organizer_id: OrganizerId) -> ApiResult<Vec<Event>> {
        self.get(&format!("/organizers/{organizer_id}/events")).await
    }

    async fn get_ticket_types(&self, event_id: EventId) -> ApiResult<Vec<TicketType>> {
        self.get(&format!("/events/{event_id}/ticket-types")).await
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> ApiResult<Ticket> {
        self.get(&format!("/tickets/{ticket_id}")).await
    }

    async fn get_user_tickets(&self, user_id: UserId) -> ApiResult<Vec<Ticket>> {
        self.get(&format!("/users/{user_id}/tickets")).await
    }

    async fn get_activity(&self, activity_id: ActivityId) -> ApiResult<ActivityItem> {
        self.get(&format!("/activities/{activity_id}")).await
    }

    async fn get_feed(&self, user_id: UserId) -> ApiResult<Vec<ActivityItem>> {
        self.get(&format!("/users/{user_id}/feed")).await
    }

    async fn like_activity(&self, activity_id: ActivityId) -> ApiResult<()> {
        self.write_empty(Method::POST, &format!("/activities/{activity_id}/like"))
            .await
    }

    async fn unlike_activity(&self, activity_id: ActivityId) -> ApiResult<()> {
        self.write_empty(Method::DELETE, &format!("/activities/{activity_id}/like"))
            .await
    }

    async fn add_comment(
        &self,
        activity_id: ActivityId,
        content: &str,
    ) -> ApiResult<Option<Comment>> {
        let body = serde_json::json!({ "content": content });
        self.write(
            Method::POST,
            &format!("/activities/{activity_id}/comments"),
            Some(body),
        )
        .await
    }

    async fn get_cart(&self) -> ApiResult<Vec<ServerCartItem>> {
        self.get("/cart").await
    }

    async fn add_cart_item(&self, item: &AddCartItem) -> ApiResult<Option<ServerCartItem>> {
        self.write(Method::POST, "/cart/items", Some(to_body(item)?))
            .await
    }

    async fn update_cart_item(
        &self,
        item_id: u64,
        quantity: u32,
    ) -> ApiResult<Option<ServerCartItem>> {
        let body = serde_json::json!({ "quantity": quantity });
        self.write(Method::PUT, &format!("/cart/items/{item_id}"), Some(body))
            .await
    }

    async fn remove_cart_item(&self, item_id: u64) -> ApiResult<()> {
        self.write_empty(Method::DELETE, &format!("/cart/items/{item_id}"))
            .await
    }

    async fn create_transaction(&self, transaction: &NewTransaction) -> ApiResult<Transaction> {
        let bytes = self
            .send(Method::POST, "/transactions", Some(to_body(transaction)?))
            .await?;
        decode(&bytes)
    }
}
