use std::{collections::HashMap, net::SocketAddr};

use axum::{
    Json, Router,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use client::{
    SyncError,
    transport::{HttpTransport, Transport},
};
use futures_util::StreamExt;
use shared::models::{
    ErrorResponse, PushEvent, SendAccepted, SendCommandRequest, SendSelectionRequest,
    SessionListResponse, SessionSummary, StreamFilter, TranscriptSlice, TurnId,
};
use url::Url;

const TOKEN: &str = "secret";

const TURN_JSON: &str = r#"{"id":7,"actor":"user","intent":"command","text":"hi","timestamp":"2025-03-08T14:30:00Z"}"#;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some("Bearer secret")
}

async fn turns(
    Path(conversation_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let turn = serde_json::from_str(TURN_JSON).unwrap();
    Json(TranscriptSlice {
        turns: vec![turn],
        has_more: query.get("before").is_some() && conversation_id == "c-1",
        oldest_turn_id: query
            .get("limit")
            .and_then(|limit| limit.parse().ok())
            .map(TurnId),
        ..TranscriptSlice::default()
    })
    .into_response()
}

async fn commands(Json(request): Json<SendCommandRequest>) -> Response {
    if request.text == "fail" {
        let body = ErrorResponse::with_details("rejected", "conversation has ended");
        return (StatusCode::CONFLICT, Json(body)).into_response();
    }
    Json(SendAccepted {
        request_id: Some("r-1".into()),
    })
    .into_response()
}

async fn selections(Json(request): Json<SendSelectionRequest>) -> Json<SendAccepted> {
    Json(SendAccepted {
        request_id: Some(format!("sel-{}", request.question_id)),
    })
}

async fn sessions(Query(query): Query<HashMap<String, String>>) -> Json<SessionListResponse> {
    let summary = SessionSummary {
        conversation_id: "c-1".into(),
        title: query.get("include_ended").cloned().unwrap_or_default(),
        agent_id: None,
        agent_state: shared::models::AgentState::Working,
        ended: false,
        last_turn_id: Some(TurnId(7)),
        updated_at: None,
    };
    Json(SessionListResponse {
        active: vec![summary],
        ended: Vec::new(),
    })
}

async fn stream(Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("conversation").map(String::as_str) != Some("c-1") {
        return (StatusCode::BAD_REQUEST, "unknown conversation").into_response();
    }
    let body = format!(
        ": keep-alive\n\n\
         event: turn_created\ndata: {{\"payload\":{{\"conversation_id\":\"c-1\",\"turn\":{TURN_JSON}}}}}\n\n\
         event: turn_created\ndata: {{not json\n\n\
         event: typing\ndata: {{}}\n\n\
         data: {{\"type\":\"gap\"}}\n\n"
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn serve() -> SocketAddr {
    let app = Router::new()
        .route("/api/conversations/{id}/turns", get(turns))
        .route("/api/conversations/{id}/commands", post(commands))
        .route("/api/conversations/{id}/selections", post(selections))
        .route("/api/sessions", get(sessions))
        .route("/api/stream", get(stream));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport(addr: SocketAddr, token: Option<&str>) -> HttpTransport {
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    HttpTransport::new(base, token.map(str::to_string))
}

#[tokio::test]
async fn fetches_transcript_with_paging_parameters() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let latest = transport.fetch_transcript("c-1", None, None).await.unwrap();
    let older = transport
        .fetch_transcript("c-1", Some(TurnId(7)), Some(25))
        .await
        .unwrap();

    assert_eq!(latest.turns.len(), 1);
    assert!(!latest.has_more);
    assert!(older.has_more);
    assert_eq!(older.oldest_turn_id, Some(TurnId(25)));
}

#[tokio::test]
async fn missing_token_is_reported_as_http_error() {
    let addr = serve().await;
    let transport = transport(addr, None);

    let error = transport.fetch_transcript("c-1", None, None).await.unwrap_err();

    assert_eq!(
        error,
        SyncError::Http {
            status: 401,
            body: ErrorResponse::new("Unauthorized"),
        }
    );
}

#[tokio::test]
async fn sends_commands_and_selections() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let accepted = transport
        .send_command(
            "c-1",
            &SendCommandRequest {
                text: "hello".into(),
                attachments: Vec::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(accepted.request_id.as_deref(), Some("r-1"));

    let selection = transport
        .send_selection(
            "c-1",
            &SendSelectionRequest {
                question_id: TurnId(12),
                selected: vec!["yes".into()],
            },
        )
        .await
        .unwrap();
    assert_eq!(selection.request_id.as_deref(), Some("sel-12"));
}

#[tokio::test]
async fn rejected_command_carries_error_body() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let error = transport
        .send_command(
            "c-1",
            &SendCommandRequest {
                text: "fail".into(),
                attachments: Vec::new(),
            },
        )
        .await
        .unwrap_err();

    assert!(error.is_rejection());
    assert_eq!(
        error,
        SyncError::Http {
            status: 409,
            body: ErrorResponse::with_details("rejected", "conversation has ended"),
        }
    );
}

#[tokio::test]
async fn lists_sessions() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let sessions = transport.list_sessions(true).await.unwrap();

    let summary = sessions.find("c-1").unwrap();
    assert_eq!(summary.title, "true");
    assert_eq!(summary.last_turn_id, Some(TurnId(7)));
}

#[tokio::test]
async fn stream_skips_malformed_and_unknown_frames() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let stream = transport
        .open_stream(&StreamFilter::for_conversation("c-1"))
        .await
        .unwrap();
    let events: Vec<PushEvent> = stream.map(Result::unwrap).collect().await;

    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        PushEvent::TurnCreated { payload } if payload.turn.id == TurnId(7)
    ));
    assert_eq!(events[1].type_name(), "gap");
}

#[tokio::test]
async fn stream_rejection_fails_the_open() {
    let addr = serve().await;
    let transport = transport(addr, Some(TOKEN));

    let result = transport
        .open_stream(&StreamFilter::for_conversation("c-404"))
        .await;

    assert!(matches!(result, Err(SyncError::Http { status: 400, .. })));
}
