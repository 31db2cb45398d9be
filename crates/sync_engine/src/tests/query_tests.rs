use super::*;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct ServerState {
    requests: Arc<Mutex<Vec<String>>>,
    authorization: Arc<Mutex<Option<String>>>,
}

impl ServerState {
    fn record(&self, line: String) {
        self.requests.lock().expect("requests").push(line);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests").clone()
    }
}

async fn list_conversations(State(state): State<ServerState>, headers: HeaderMap) -> Json<Value> {
    *state.authorization.lock().expect("authorization") = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    Json(serde_json::json!({
        "conversations": [
            {
                "_id": "c1",
                "name": "general",
                "participants": ["u1", "u2"],
                "lastMessageTime": "2024-05-01T10:00:00Z",
                "unreadCount": 3,
                "isGroup": true
            },
            { "name": "missing id" }
        ]
    }))
}

async fn get_conversation(Path(id): Path<String>) -> Json<Value> {
    Json(serde_json::json!({
        "conversation": {
            "id": id,
            "name": "general",
            "members": [
                { "userId": "u1", "username": "ann" },
                { "_id": "u2" }
            ]
        }
    }))
}

async fn list_messages(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut keys: Vec<_> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    keys.sort();
    state.record(format!("GET messages {id} {}", keys.join("&")));
    Json(serde_json::json!([
        {
            "_id": "m2",
            "content": "second",
            "createdAt": "2024-05-01T10:05:00Z",
            "sender": { "_id": "u2" }
        },
        { "content": "no id" },
        { "_id": "m1", "content": "first", "createdAt": "2024-05-01T10:00:00Z", "sender": "u1" }
    ]))
}

async fn add_members(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record(format!("POST members {id} {body}"));
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "code": "forbidden", "message": "only admins can add members" })),
    )
}

async fn remove_reaction(
    State(state): State<ServerState>,
    Path((id, emoji)): Path<(String, String)>,
) -> StatusCode {
    state.record(format!("DELETE reaction {id} {emoji}"));
    StatusCode::NO_CONTENT
}

async fn add_reaction(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.record(format!("POST reaction {id} {body}"));
    StatusCode::CREATED
}

async fn list_reactions(Path(_id): Path<String>) -> Json<Value> {
    Json(serde_json::json!([{ "userId": "u2", "emoji": "🎉" }]))
}

async fn spawn_api_server() -> anyhow::Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/messages", get(list_messages))
        .route("/api/conversations/:id/members", post(add_members))
        .route(
            "/api/messages/:id/reactions",
            get(list_reactions).post(add_reaction),
        )
        .route("/api/messages/:id/reactions/:emoji", delete(remove_reaction))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), state))
}

#[tokio::test]
async fn lists_conversations_and_skips_malformed_entries() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpConversationApi::new(&server_url)
        .expect("api")
        .with_token("tok-1");

    let conversations = api.list_conversations().await.expect("list");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].id, ConversationId::from("c1"));
    assert_eq!(conversations[0].member_count, 2);
    assert_eq!(conversations[0].unread_count, 3);
    assert_eq!(
        *state.authorization.lock().expect("authorization"),
        Some("Bearer tok-1".to_string())
    );
}

#[tokio::test]
async fn fetches_conversation_detail_with_members() {
    let (server_url, _state) = spawn_api_server().await.expect("spawn server");
    let api = HttpConversationApi::new(&server_url).expect("api");

    let detail = api
        .get_conversation(&ConversationId::from("c1"))
        .await
        .expect("detail");
    assert_eq!(detail.summary.id, ConversationId::from("c1"));
    assert_eq!(detail.summary.member_count, 2);
    assert_eq!(detail.members[0].username.as_deref(), Some("ann"));
    assert_eq!(detail.members[1].user_id, UserId::from("u2"));
}

#[tokio::test]
async fn message_page_carries_cursor_and_fills_conversation() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpConversationApi::new(&server_url).expect("api");

    let page = api
        .list_messages(&ConversationId::from("c1"), 50, Some(&MessageId::from("m9")))
        .await
        .expect("page");

    let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);
    assert!(page
        .iter()
        .all(|m| m.conversation_id == ConversationId::from("c1")));
    assert_eq!(page[0].sender_id, Some(UserId::from("u2")));
    assert_eq!(state.requests(), vec!["GET messages c1 before=m9&limit=50".to_string()]);
}

#[tokio::test]
async fn api_error_body_is_surfaced() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpConversationApi::new(&server_url).expect("api");

    let err = api
        .add_members(&ConversationId::from("c1"), &[UserId::from("u7")])
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("only admins can add members"), "{err}");
    assert_eq!(
        state.requests(),
        vec![r#"POST members c1 {"userIds":["u7"]}"#.to_string()]
    );
}

#[tokio::test]
async fn reactions_round_trip_through_endpoints() {
    let (server_url, state) = spawn_api_server().await.expect("spawn server");
    let api = HttpConversationApi::new(&server_url).expect("api");
    let message_id = MessageId::from("m1");

    let reactions = api.list_reactions(&message_id).await.expect("reactions");
    assert_eq!(reactions[0].emoji, "🎉");

    api.add_reaction(&message_id, "👍").await.expect("add");
    api.remove_reaction(&message_id, "👍").await.expect("remove");
    assert_eq!(
        state.requests(),
        vec![
            r#"POST reaction m1 {"emoji":"👍"}"#.to_string(),
            "DELETE reaction m1 👍".to_string(),
        ]
    );
}

#[tokio::test]
async fn missing_api_reports_unavailable() {
    let err = MissingConversationApi
        .list_conversations()
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("unavailable"));
}

#[test]
fn rejects_unparsable_server_url() {
    assert!(HttpConversationApi::new("not a url").is_err());
}
