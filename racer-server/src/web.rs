use axum::{
    body::Bytes,
    debug_handler,
    extract::State,
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, TimeZone};
use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Display,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use racer_core::{Action, ActionOutcome, MarkSide, Projection};
use racer_server::Session;

const STATE_URI: &str = "/api/state";
const PUSH_OFF_URI: &str = "/api/push-off";
const START_URI: &str = "/api/start";
const BUMP_URI: &str = "/api/bump";
const SYNC_URI: &str = "/api/sync";
const FINISH_URI: &str = "/api/finish";
const LINE_URI: &str = "/api/line";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct Web {
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Web {
            session,
            shutdown_tx,
        }
    }

    fn router(self) -> Router {
        Router::new()
            .route(STATE_URI, get(get_state))
            .route(PUSH_OFF_URI, post(push_off))
            .route(START_URI, post(start_sequence))
            .route(BUMP_URI, post(bump))
            .route(SYNC_URI, post(sync))
            .route(FINISH_URI, post(finish))
            .route(LINE_URI, post(set_mark).delete(clear_marks))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let port = self.session.read().unwrap().args.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port))
                .await
                .map_err(WebError::Io)?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone(); // self is consumed by router()

        let app = self.router();

        info!("Starting HTTP web server on port {}", port);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                return r.map_err(WebError::Io);
            }
        }
        Ok(())
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

// =============================================================================
// Request and response bodies
// =============================================================================

#[derive(Deserialize, Default)]
#[serde(default)]
struct ConfirmBody {
    confirm: bool,
}

#[derive(Deserialize)]
struct SecondsBody {
    seconds: f64,
    #[serde(default)]
    confirm: bool,
}

#[derive(Deserialize)]
struct LineBody {
    end: MarkSide,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    #[serde(flatten)]
    projection: Projection,
    /// `h:MM` while the time-of-day clock runs
    time_of_day: Option<String>,
    gps_time: bool,
}

/// An empty body reads as `{}`, so `confirm` can be left out entirely
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)).into_response())
}

/// 12-hour clock without a leading zero, e.g. `9:05`
fn format_time_of_day<Tz: TimeZone>(epoch: f64, tz: &Tz) -> Option<String>
where
    Tz::Offset: Display,
{
    let time = DateTime::from_timestamp(epoch.floor() as i64, 0)?;
    Some(time.with_timezone(tz).format("%-I:%M").to_string())
}

// =============================================================================
// Handlers
// =============================================================================

async fn dispatch(state: &Web, action: Action, confirm: bool) -> Response {
    let engine = state.session.engine();
    match engine.action(action, confirm).await {
        Ok(response) => {
            let status = match response.outcome {
                ActionOutcome::Rejected { .. } => StatusCode::CONFLICT,
                _ => StatusCode::OK,
            };
            (status, Json(response)).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[debug_handler]
async fn get_state(State(state): State<Web>) -> Response {
    let engine = state.session.engine();
    let gps_time = state.session.clock().is_gps_corrected();

    match engine.snapshot().await {
        Ok(projection) => {
            let time_of_day = projection
                .clock_minute_epoch
                .and_then(|epoch| format_time_of_day(epoch, &Local));
            Json(StateResponse {
                projection,
                time_of_day,
                gps_time,
            })
            .into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[debug_handler]
async fn push_off(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<ConfirmBody>(&body) {
        Ok(body) => dispatch(&state, Action::PushOff, body.confirm).await,
        Err(response) => response,
    }
}

#[debug_handler]
async fn start_sequence(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<SecondsBody>(&body) {
        Ok(body) => {
            debug!("Start {} s (confirm: {})", body.seconds, body.confirm);
            dispatch(
                &state,
                Action::StartSequence {
                    seconds: body.seconds,
                },
                body.confirm,
            )
            .await
        }
        Err(response) => response,
    }
}

#[debug_handler]
async fn bump(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<SecondsBody>(&body) {
        Ok(body) => {
            dispatch(
                &state,
                Action::Bump {
                    seconds: body.seconds,
                },
                body.confirm,
            )
            .await
        }
        Err(response) => response,
    }
}

#[debug_handler]
async fn sync(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<ConfirmBody>(&body) {
        Ok(body) => dispatch(&state, Action::Sync, body.confirm).await,
        Err(response) => response,
    }
}

#[debug_handler]
async fn finish(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<ConfirmBody>(&body) {
        Ok(body) => dispatch(&state, Action::Finish, body.confirm).await,
        Err(response) => response,
    }
}

#[debug_handler]
async fn set_mark(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<LineBody>(&body) {
        Ok(body) => dispatch(&state, Action::SetMark { side: body.end }, false).await,
        Err(response) => response,
    }
}

#[debug_handler]
async fn clear_marks(State(state): State<Web>, body: Bytes) -> Response {
    match parse_body::<ConfirmBody>(&body) {
        Ok(body) => dispatch(&state, Action::ClearMarks, body.confirm).await,
        Err(response) => response,
    }
}
