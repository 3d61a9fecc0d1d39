use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::errors::CatalogError;
use crate::services::basket_service::BasketStore;
use crate::services::notify_service::BasketEvent;
use crate::services::query_service::lenient_int;
use crate::session;
use crate::state::{AppState, MetadataEntry};

/// Build all basket routes under /api/basket
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_basket).post(toggle_kb))
        .route("/reconcile", post(reconcile))
        .route("/entries", get(basket_entries))
        .route("/ws", get(watch))
        .with_state(state)
}

/// Body of `POST /api/basket`. `kb` may arrive as a number or a string.
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub kb: Value,
    #[serde(default)]
    pub add: bool,
}

/// Body of `POST /api/basket/reconcile`: the client's local basket.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub kbs: Vec<Value>,
}

/// Read a KB number from loosely typed JSON. Anything unusable is `None`.
fn coerce_kb(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => lenient_int(s).and_then(|n| u64::try_from(n).ok()),
        _ => None,
    }
}

//
// ─────────────────────────────────────────────────────────────
// GET /api/basket
// Current basket of the caller's session
// ─────────────────────────────────────────────────────────────
//
async fn get_basket(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<Vec<u64>>)
{
    let (jar, sid) = session::resolve(jar);
    (jar, Json(state.baskets.get(&sid)))
}

//
// ─────────────────────────────────────────────────────────────
// POST /api/basket
// { "kb": 100001, "add": true } adds, "add": false removes
// ─────────────────────────────────────────────────────────────
//
async fn toggle_kb(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ToggleRequest>,
) -> (CookieJar, Json<Vec<u64>>)
{
    let (jar, sid) = session::resolve(jar);

    let basket = match coerce_kb(&req.kb) {
        Some(kb) if req.add => state.baskets.add(&sid, kb),
        Some(kb) => state.baskets.remove(&sid, kb),
        None => {
            tracing::debug!("Ignoring basket toggle with unusable kb {}", req.kb);
            state.baskets.get(&sid)
        }
    };

    (jar, Json(basket))
}

//
// ─────────────────────────────────────────────────────────────
// POST /api/basket/reconcile
// Merge a client-held basket into the server copy
// ─────────────────────────────────────────────────────────────
//
async fn reconcile(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ReconcileRequest>,
) -> (CookieJar, Json<Vec<u64>>)
{
    let (jar, sid) = session::resolve(jar);
    let local: Vec<u64> = req.kbs.iter().filter_map(coerce_kb).collect();
    (jar, Json(state.baskets.reconcile(&sid, &local)))
}

//
// ─────────────────────────────────────────────────────────────
// GET /api/basket/entries
// Catalog entries in the basket, for downloading them all
// ─────────────────────────────────────────────────────────────
//
async fn basket_entries(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Vec<MetadataEntry>>), CatalogError>
{
    let (jar, sid) = session::resolve(jar);
    let kbs = state.baskets.get(&sid);
    let entries = state.catalog.entries_for(&kbs).await?;
    Ok((jar, Json(entries)))
}

//
// ─────────────────────────────────────────────────────────────
// GET /api/basket/ws
// Live basket updates; the current basket is sent first
// ─────────────────────────────────────────────────────────────
//
async fn watch(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> (CookieJar, Response)
{
    let (jar, sid) = session::resolve(jar);
    let baskets = state.baskets.clone();
    (jar, ws.on_upgrade(move |socket| watch_basket(socket, baskets, sid)))
}

/// What a watcher receives: the basket contents only, never the session id.
#[derive(Debug, Serialize)]
struct BasketMessage<'a> {
    kbs: &'a [u64],
}

fn encode_event(event: &BasketEvent) -> serde_json::Result<String> {
    serde_json::to_string(&BasketMessage { kbs: &event.kbs })
}

async fn watch_basket(socket: WebSocket, baskets: BasketStore, sid: String) {
    let events = baskets.notifier().subscribe(&sid);
    forward_changes(socket, &baskets, &sid, events).await;

    baskets.notifier().release(&sid);
    tracing::debug!("Basket watcher for {sid} closed");
}

async fn forward_changes(
    socket: WebSocket,
    baskets: &BasketStore,
    sid: &str,
    mut events: broadcast::Receiver<BasketEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    let snapshot = BasketEvent {
        session_id: sid.to_string(),
        kbs: baskets.get(sid),
    };
    if send_event(&mut sink, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Basket watcher for {sid} skipped {skipped} events");
                        BasketEvent { session_id: sid.to_string(), kbs: baskets.get(sid) }
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_event<S>(sink: &mut S, event: &BasketEvent) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = encode_event(event).map_err(|e| {
        tracing::warn!("Could not encode basket event: {e}");
    })?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
