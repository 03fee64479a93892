use crate::agent::{AgentOptions, AgentRuntime, build_prompt};
use crate::protocol::ChatRequest;
use crate::pump::pump;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub struct ServerConfig {
    pub listen: String,
    pub options: AgentOptions,
    pub channel_capacity: usize,
}

struct ServerState {
    runtime: Arc<dyn AgentRuntime>,
    options: AgentOptions,
    channel_capacity: usize,
}

pub async fn run(config: ServerConfig, runtime: Arc<dyn AgentRuntime>) -> anyhow::Result<()> {
    let listen = config.listen.clone();
    let app = router(config, runtime);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(address = %listen, "relay listening");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(config: ServerConfig, runtime: Arc<dyn AgentRuntime>) -> axum::Router {
    let state = Arc::new(ServerState {
        runtime,
        options: config.options,
        channel_capacity: config.channel_capacity.max(1),
    });

    axum::Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, (StatusCode, &'static str)> {
    if !payload.is_well_formed() {
        return Err((StatusCode::BAD_REQUEST, "Invalid messages"));
    }

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("chat", %request_id);
    let prompt = build_prompt(&payload.messages);
    span.in_scope(|| {
        tracing::info!(
            messages = payload.messages.len(),
            prompt_len = prompt.len(),
            "starting agent run"
        );
    });

    let source = state.runtime.query(prompt, &state.options);
    let (tx, rx) = mpsc::channel(state.channel_capacity);
    let cancel = CancellationToken::new();
    tokio::spawn(pump(source, tx, cancel.clone()).instrument(span));

    // Dropping the response body (client disconnect) cancels the pump.
    let guard = cancel.drop_guard();
    let body = ReceiverStream::new(rx).map(move |frame| {
        let _held = &guard;
        Ok::<_, Infallible>(frame)
    });

    let response = (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response();

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ReplayRuntime;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(runtime: ReplayRuntime) -> axum::Router {
        router(
            ServerConfig {
                listen: "127.0.0.1:0".to_string(),
                options: AgentOptions::new("."),
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
            Arc::new(runtime),
        )
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_responds_ok() {
        let response = app(ReplayRuntime::default())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let response = app(ReplayRuntime::default())
            .oneshot(chat_request(r#"{"messages":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let response = app(ReplayRuntime::default())
            .oneshot(chat_request(r#"{"messages":"nope"}"#))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn stream_response_headers_and_done_frame() {
        let response = app(ReplayRuntime::default())
            .oneshot(chat_request(r#"{"messages":[{"role":"user","content":"hi"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"data: [DONE]\n\n");
    }
}
