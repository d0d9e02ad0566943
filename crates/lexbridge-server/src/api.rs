use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use lexbridge_cases::{ConnectionAction, ConnectionDesk, Matcher, ProposalAction};
use lexbridge_shared::constants::{HISTORY_PAGE_MAX, HISTORY_PAGE_SIZE};
use lexbridge_shared::identity::Identity;
use lexbridge_shared::protocol::MessagePayload;
use lexbridge_shared::types::{CaseId, CaseKind, CaseStatus, ChannelId, Role, UserId};
use lexbridge_store::{Case, Channel, DirectConnection, Proposal, StoreHandle};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::gateway::{Gateway, GatewayStats};
use crate::identity::credential_from;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub matcher: Matcher,
    pub desk: ConnectionDesk,
    pub store: StoreHandle,
    pub http_limiter: RateLimiter<std::net::IpAddr>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/cases", post(create_case))
        .route("/cases/{id}", get(get_case))
        .route("/cases/{id}/offers", post(submit_offer))
        .route("/cases/{id}/requests", post(submit_request))
        .route("/cases/{id}/proposals/{proposal_id}", post(respond_to_proposal))
        .route("/cases/{id}/status", post(set_case_status))
        .route("/cases/{id}/channel", post(ensure_case_channel))
        .route("/connections", post(request_connection))
        .route("/connections/{id}/respond", post(respond_to_connection))
        .route("/connections/{id}/block", post(block_connection))
        .route("/channels/direct", post(open_direct_chat))
        .route("/channels/{id}/messages", get(channel_history))
        .route("/admin/status", get(admin_status))
        .layer(middleware::from_fn_with_state(
            state.http_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    message_rate_capacity: u32,
    message_rate_window_secs: u64,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    name: String,
    uptime_secs: u64,
    gateway: GatewayStats,
}

#[derive(Deserialize)]
struct CreateCaseRequest {
    kind: CaseKind,
    title: String,
}

#[derive(Deserialize)]
struct OfferRequest {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct CitizenRequest {
    lawyer_id: UserId,
    #[serde(default)]
    message: String,
}

/// `accept` or `reject`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Decision {
    Accept,
    Reject,
}

#[derive(Deserialize)]
struct DecisionRequest {
    action: Decision,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct RespondResponse {
    case: Case,
    proposal: Proposal,
    channel: Option<Channel>,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: CaseStatus,
}

#[derive(Deserialize)]
struct ConnectionRequest {
    lawyer_id: UserId,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct ConnectionResponse {
    connection: DirectConnection,
    channel: Option<Channel>,
}

#[derive(Deserialize)]
struct DirectChatRequest {
    counterpart: UserId,
}

#[derive(Deserialize)]
struct HistoryQuery {
    before: Option<i64>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HistoryResponse {
    channel_id: ChannelId,
    messages: Vec<MessagePayload>,
}

// ─── Handlers ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        message_rate_capacity: state.config.message_rate_capacity,
        message_rate_window_secs: state.config.message_rate_window.as_secs(),
    })
}

async fn create_case(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let caller = caller(&headers, &state)?;
    require_role(&caller, Role::Citizen)?;

    let case = state
        .matcher
        .create_case(req.kind, caller.user_id, &req.title)
        .await?;
    Ok((StatusCode::CREATED, Json(case)))
}

/// Parties to the case and admins see it; lawyers also see cases still
/// open for offers.
async fn get_case(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Case>, ApiError> {
    let caller = caller(&headers, &state)?;
    let case = state.matcher.get_case(CaseId(id)).await?;

    let user = caller.user_id;
    let visible = caller.role == Role::Admin
        || case.owner == user
        || case.assigned_lawyer == Some(user)
        || case.proposals().any(|p| p.proposer == user || p.counterpart == user)
        || (caller.role == Role::Lawyer && case.is_open());
    if !visible {
        return Err(ApiError::Forbidden("not a party to this case".into()));
    }
    Ok(Json(case))
}

async fn submit_offer(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OfferRequest>,
) -> Result<(StatusCode, Json<Proposal>), ApiError> {
    let caller = caller(&headers, &state)?;
    require_role(&caller, Role::Lawyer)?;

    let offer = state
        .matcher
        .submit_offer(CaseId(id), caller.user_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

async fn submit_request(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CitizenRequest>,
) -> Result<(StatusCode, Json<Proposal>), ApiError> {
    let caller = caller(&headers, &state)?;

    let request = state
        .matcher
        .submit_request(CaseId(id), caller.user_id, req.lawyer_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn respond_to_proposal(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, proposal_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<RespondResponse>, ApiError> {
    let caller = caller(&headers, &state)?;
    let action = match req.action {
        Decision::Accept => ProposalAction::Accept,
        Decision::Reject => ProposalAction::Reject,
    };

    let outcome = state
        .matcher
        .respond(CaseId(id), proposal_id, caller.user_id, action)
        .await?;
    Ok(Json(RespondResponse {
        case: outcome.case,
        proposal: outcome.proposal,
        channel: outcome.channel,
    }))
}

async fn set_case_status(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Case>, ApiError> {
    let caller = caller(&headers, &state)?;
    let case = state
        .matcher
        .set_status(CaseId(id), caller.user_id, req.status)
        .await?;
    Ok(Json(case))
}

async fn ensure_case_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Channel>, ApiError> {
    let caller = caller(&headers, &state)?;
    let case = state.matcher.get_case(CaseId(id)).await?;
    let party = case.owner == caller.user_id || case.assigned_lawyer == Some(caller.user_id);
    if !party && caller.role != Role::Admin {
        return Err(ApiError::Forbidden("not a party to this case".into()));
    }

    let channel = state.matcher.ensure_case_channel(case.id).await?;
    Ok(Json(channel))
}

async fn request_connection(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> Result<(StatusCode, Json<DirectConnection>), ApiError> {
    let caller = caller(&headers, &state)?;
    require_role(&caller, Role::Citizen)?;

    let connection = state
        .desk
        .request(caller.user_id, req.lawyer_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn respond_to_connection(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let caller = caller(&headers, &state)?;
    let action = match req.action {
        Decision::Accept => ConnectionAction::Accept,
        Decision::Reject => ConnectionAction::Reject,
    };

    let outcome = state
        .desk
        .respond(id, caller.user_id, action, req.message)
        .await?;
    Ok(Json(ConnectionResponse {
        connection: outcome.connection,
        channel: outcome.channel,
    }))
}

async fn block_connection(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DirectConnection>, ApiError> {
    let caller = caller(&headers, &state)?;
    let connection = state.desk.block(id, caller.user_id).await?;
    Ok(Json(connection))
}

async fn open_direct_chat(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<DirectChatRequest>,
) -> Result<Json<Channel>, ApiError> {
    let caller = caller(&headers, &state)?;
    let channel = state
        .matcher
        .provisioner()
        .open_direct_chat(caller.user_id, req.counterpart)
        .await?;
    Ok(Json(channel))
}

async fn channel_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let caller = caller(&headers, &state)?;
    let channel_id = ChannelId(id);
    let limit = query
        .limit
        .unwrap_or(HISTORY_PAGE_SIZE)
        .clamp(1, HISTORY_PAGE_MAX);

    let user = caller.user_id;
    let id = channel_id.clone();
    let messages = state
        .store
        .call(move |db| {
            if !db.is_participant(&id, user)? {
                return Ok(None);
            }
            db.get_messages_for_channel(&id, limit, query.before).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::Forbidden("not a participant".into()))?;

    Ok(Json(HistoryResponse {
        channel_id,
        messages: messages.iter().map(|m| m.to_payload()).collect(),
    }))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ApiError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ApiError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ApiError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_status(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ApiError> {
    verify_admin_token(&headers, &state.config)?;

    Ok(Json(AdminStatusResponse {
        name: state.config.instance_name.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        gateway: state.gateway.stats().await,
    }))
}

/// The verified identity behind a bearer credential.
fn caller(headers: &HeaderMap, state: &AppState) -> Result<Identity, ApiError> {
    let credential = credential_from(headers, None)
        .ok_or_else(|| ApiError::Unauthenticated("missing bearer credential".into()))?;
    Ok(state.gateway.authenticate(&credential)?)
}

fn require_role(identity: &Identity, role: Role) -> Result<(), ApiError> {
    if identity.role != role {
        return Err(ApiError::Forbidden(format!("requires the {role} role")));
    }
    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use ed25519_dalek::SigningKey;
    use futures::{SinkExt, StreamExt};
    use rand::rngs::OsRng;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    use lexbridge_cases::EventPublisher;
    use lexbridge_shared::identity::{create_identity_token, encode_credential};

    use crate::identity::TokenVerifier;
    use crate::notifier::spawn_notifier;

    struct TestApp {
        key: SigningKey,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let key = SigningKey::generate(&mut OsRng);
            let mut config = ServerConfig::default();
            config.auth_server_pubkey = key.verifying_key().to_bytes();
            config.admin_token = Some("admin-secret".into());

            let store = StoreHandle::in_memory().unwrap();
            let (events, rx) = EventPublisher::channel();
            let matcher = Matcher::new(store.clone(), events.clone());
            let desk = ConnectionDesk::new(store.clone(), events);
            let gateway = Gateway::new(
                Arc::new(TokenVerifier::new(config.auth_server_pubkey)),
                store.clone(),
                RateLimiter::new(config.message_rate_capacity, config.message_rate_window),
            );
            spawn_notifier(gateway.clone(), rx);

            let state = AppState {
                gateway,
                matcher,
                desk,
                store,
                http_limiter: RateLimiter::new(1000, Duration::from_secs(60)),
                config: Arc::new(config),
                started_at: Instant::now(),
            };
            Self { key, state }
        }

        fn token(&self, user: UserId, role: Role) -> String {
            let identity = Identity { user_id: user, role, active: true };
            let expires = Utc::now() + chrono::Duration::hours(1);
            encode_credential(&create_identity_token(identity, expires, &self.key))
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> (StatusCode, serde_json::Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = build_router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, json)
        }
    }

    #[tokio::test]
    async fn health_and_auth() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = app
            .call(Method::POST, "/cases", None, Some(serde_json::json!({"kind": "query", "title": "t"})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn proposal_flow_maps_errors_to_status() {
        let app = TestApp::new();
        let (citizen, lawyer, other) = (UserId::new(), UserId::new(), UserId::new());
        let citizen_token = app.token(citizen, Role::Citizen);
        let lawyer_token = app.token(lawyer, Role::Lawyer);
        let other_token = app.token(other, Role::Lawyer);

        // Lawyers cannot open cases.
        let (status, _) = app
            .call(Method::POST, "/cases", Some(&lawyer_token), Some(serde_json::json!({"kind": "query", "title": "t"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, case) = app
            .call(Method::POST, "/cases", Some(&citizen_token), Some(serde_json::json!({"kind": "dispute", "title": "Rent"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let case_id = case["id"].as_str().unwrap().to_string();

        let offers = format!("/cases/{case_id}/offers");
        let (status, offer) = app
            .call(Method::POST, &offers, Some(&lawyer_token), Some(serde_json::json!({"message": "I can help"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let offer_id = offer["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(Method::POST, &offers, Some(&lawyer_token), Some(serde_json::json!({"message": "again"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "already_offered");

        let respond = format!("/cases/{case_id}/proposals/{offer_id}");
        let (status, _) = app
            .call(Method::POST, &respond, Some(&other_token), Some(serde_json::json!({"action": "accept"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call(Method::POST, &respond, Some(&citizen_token), Some(serde_json::json!({"action": "accept"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["case"]["status"], "assigned");
        assert_eq!(body["channel"]["id"], format!("dispute_{case_id}"));

        let (status, body) = app
            .call(Method::POST, &respond, Some(&citizen_token), Some(serde_json::json!({"action": "accept"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "already_resolved");

        let (status, _) = app
            .call(Method::GET, &format!("/cases/{case_id}"), Some(&other_token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = format!("/cases/{}", Uuid::new_v4());
        let (status, _) = app.call(Method::GET, &missing, Some(&citizen_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_is_for_participants_only() {
        let app = TestApp::new();
        let (citizen, lawyer) = (UserId::new(), UserId::new());
        let citizen_token = app.token(citizen, Role::Citizen);
        let lawyer_token = app.token(lawyer, Role::Lawyer);

        let (status, connection) = app
            .call(Method::POST, "/connections", Some(&citizen_token), Some(serde_json::json!({"lawyer_id": lawyer, "message": "Hi"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let connection_id = connection["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                Method::POST,
                &format!("/connections/{connection_id}/respond"),
                Some(&lawyer_token),
                Some(serde_json::json!({"action": "accept", "message": "Sure"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connection"]["status"], "accepted");
        let channel_id = ChannelId::for_direct(citizen, lawyer);
        assert_eq!(body["channel"]["id"], channel_id.as_str());
        assert_eq!(body["channel"]["status"], "active");

        let (status, body) = app
            .call(Method::GET, &format!("/channels/{channel_id}/messages"), Some(&citizen_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 0);

        let stranger = app.token(UserId::new(), Role::Citizen);
        let (status, _) = app
            .call(Method::GET, &format!("/channels/{channel_id}/messages"), Some(&stranger), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_status_requires_token() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/admin/status", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.call(Method::GET, "/admin/status", Some("admin-secret"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gateway"]["sessions"], 0);
    }

    async fn next_event(
        socket: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        name: &str,
    ) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for event")
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = frame {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value["data"].clone();
                }
            }
        }
    }

    #[tokio::test]
    async fn websocket_end_to_end() {
        let app = TestApp::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(app.state.clone());
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await
            .unwrap();
        });

        let (citizen, lawyer) = (UserId::new(), UserId::new());
        let citizen_token = app.token(citizen, Role::Citizen);
        let lawyer_token = app.token(lawyer, Role::Lawyer);

        // A bad credential never upgrades.
        assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=bogus"))
            .await
            .is_err());

        let (mut cws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={citizen_token}"))
            .await
            .unwrap();
        let (mut lws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={lawyer_token}"))
            .await
            .unwrap();
        let connected = next_event(&mut cws, "connected").await;
        assert_eq!(connected["userId"], citizen.to_string());
        next_event(&mut lws, "connected").await;

        let case = app.state.matcher.create_case(CaseKind::Query, citizen, "Contract").await.unwrap();
        let offer = app.state.matcher.submit_offer(case.id, lawyer, "Happy to help").await.unwrap();
        app.state
            .matcher
            .respond(case.id, offer.id, citizen, ProposalAction::Accept)
            .await
            .unwrap();

        let ready = next_event(&mut lws, "channel_ready").await;
        let channel_id = format!("query_{}", case.id);
        assert_eq!(ready["channelId"], channel_id);
        next_event(&mut cws, "channel_ready").await;

        for ws in [&mut cws, &mut lws] {
            let join = serde_json::json!({"event": "join_channel", "data": {"channelId": channel_id}});
            ws.send(WsMessage::Text(join.to_string().into())).await.unwrap();
            next_event(ws, "joined_channel").await;
        }

        let send = serde_json::json!({
            "event": "send_message",
            "data": {"channelId": channel_id, "content": "Hello counsel", "type": "text", "clientRef": "r1"}
        });
        cws.send(WsMessage::Text(send.to_string().into())).await.unwrap();

        let relayed = next_event(&mut lws, "new_message").await;
        assert_eq!(relayed["content"], "Hello counsel");
        assert_eq!(relayed["seq"], 1);
        let ack = next_event(&mut cws, "message_sent").await;
        assert_eq!(ack["clientRef"], "r1");

        // Errors come back as events and the session stays usable.
        cws.send(WsMessage::Text("{bad".into())).await.unwrap();
        let error = next_event(&mut cws, "error").await;
        assert_eq!(error["code"], "invalid_event");
        cws.send(WsMessage::Text(r#"{"event":"ping"}"#.into())).await.unwrap();
        next_event(&mut cws, "pong").await;
    }
}
