//! WebSocket handler: frame relay between one client and its room.
//!
//! DESIGN
//! ======
//! On upgrade the ticket is redeemed for an [`Identity`] and the connection
//! enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames pushed by the room actor → forward to client
//!
//! Handlers talk to the room through its [`RoomHandle`] and return an
//! `Outcome`; they never write to the socket. The room broadcasts every
//! change (`shape:changed`, `lock:changed`, `history:appended`) to all
//! joined sessions itself, so a handler's reply only carries the result of
//! the request.
//!
//! `ai:prompt` is the one deferred request: the translator can take tens of
//! seconds, so the reply is produced by a spawned task and delivered through
//! the connection's push channel while the loop keeps serving.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `session_id`
//! 2. `room:join` attaches the session to a room (leaving any previous one)
//! 3. Client frames → dispatch → Outcome → reply
//! 4. Close → leave the room, releasing the session's locks

use std::collections::{BTreeMap, HashMap};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ai::Viewport;
use crate::document::{Field, FieldValue, Geometry, Shape, ShapeId, Style, Update, normalize_rotation};
use crate::error::RoomError;
use crate::frame::{Data, FRAME_CODE, FRAME_MESSAGE, Frame, Status};
use crate::identity::Identity;
use crate::locks::{SelectOutcome, SessionId};
use crate::room::{Edit, EditOutcome, PromptRequest, RoomHandle};
use crate::state::AppState;

const CLIENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// frames for the sender.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
    /// The reply will arrive later through the push channel.
    Deferred,
}

/// Per-connection state.
pub(crate) struct Connection {
    pub(crate) session_id: SessionId,
    pub(crate) identity: Identity,
    pub(crate) client_tx: mpsc::Sender<Frame>,
    pub(crate) room: Option<RoomHandle>,
}

impl Connection {
    pub(crate) fn new(identity: Identity, client_tx: mpsc::Sender<Frame>) -> Self {
        Self { session_id: Uuid::new_v4(), identity, client_tx, room: None }
    }

    async fn leave_room(&mut self) {
        if let Some(room) = self.room.take() {
            room.leave(self.session_id).await;
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let identity = match state.identity.authenticate(ticket).await {
        Ok(Some(identity)) => identity,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    // Room pushes and deferred replies share this channel.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);
    let mut conn = Connection::new(identity, client_tx);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("session_id", conn.session_id.to_string())
        .with_data("user_id", conn.identity.user_id.to_string())
        .with_data("role", serde_json::to_value(conn.identity.role).unwrap_or_default());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(session_id = %conn.session_id, user = %conn.identity.display_name, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    conn.leave_room().await;
    info!(session_id = %conn.session_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch end-to-end.
pub(crate) async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(session_id = %conn.session_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data(FRAME_MESSAGE, format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user as `from`.
    req.from = Some(conn.identity.user_id.to_string());
    info!(session_id = %conn.session_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "room" => handle_room(state, conn, &req).await,
        "shape" => handle_shape(conn, &req).await,
        "ai" => handle_ai(conn, &req),
        "history" => handle_history(conn, &req).await,
        "doc" => handle_doc(conn, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Deferred) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

fn op(req: &Frame) -> &str {
    req.syscall.split_once(':').map_or("", |(_, op)| op)
}

fn joined<'a>(conn: &'a Connection, req: &Frame) -> Result<&'a RoomHandle, Frame> {
    conn.room.as_ref().ok_or_else(|| req.error_from(&RoomError::NotJoined))
}

/// Deserialize `data[key]`, reporting a readable error frame.
fn field<T: DeserializeOwned>(req: &Frame, key: &str) -> Result<T, Frame> {
    let Some(value) = req.data.get(key) else {
        return Err(req.error(format!("{key} required")));
    };
    serde_json::from_value(value.clone()).map_err(|e| req.error(format!("invalid {key}: {e}")))
}

/// Like [`field`], but a missing or null key is `None`.
fn optional<T: DeserializeOwned>(req: &Frame, key: &str) -> Result<Option<T>, Frame> {
    match req.data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => field(req, key).map(Some),
    }
}

/// Flatten a serializable struct into frame data.
fn to_data(value: &impl serde::Serialize) -> Data {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    match op(req) {
        "join" => {
            let room_id = match req.room_id.clone() {
                Some(room_id) => room_id,
                None => field::<String>(req, "room_id")?,
            };
            if room_id.trim().is_empty() {
                return Err(req.error("room_id required"));
            }
            let color = optional::<String>(req, "color")?;

            conn.leave_room().await;
            let (handle, joined) = state
                .rooms
                .join(&room_id, conn.session_id, conn.identity.clone(), color, conn.client_tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            conn.room = Some(handle);

            let mut data = to_data(&joined);
            data.insert("room_id".into(), serde_json::json!(room_id));
            data.insert("session_id".into(), serde_json::json!(conn.session_id));
            Ok(Outcome::Reply(data))
        }
        "leave" => {
            conn.leave_room().await;
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// SHAPE HANDLERS
// =============================================================================

/// Shape as sent by a client. Id and style are optional; provenance and
/// stacking order are assigned by the room.
#[derive(Debug, Deserialize)]
struct ShapeDraft {
    id: Option<ShapeId>,
    x: f64,
    y: f64,
    #[serde(flatten)]
    geometry: Geometry,
    style: Option<Style>,
    #[serde(default)]
    rotation: f64,
}

impl ShapeDraft {
    fn into_shape(self) -> Shape {
        let mut shape = Shape::new(self.geometry, self.x, self.y);
        if let Some(id) = self.id {
            shape.id = id;
        }
        if let Some(style) = self.style {
            shape.style = style;
        }
        shape.rotation = normalize_rotation(self.rotation);
        shape
    }
}

async fn handle_shape(conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room = joined(conn, req)?;
    let session_id = conn.session_id;
    match op(req) {
        "select" => {
            let ids: Vec<ShapeId> = field(req, "ids")?;
            let outcome = room.select(session_id, ids).await.map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            match outcome {
                SelectOutcome::Granted { acquired, released } => {
                    data.insert("granted".into(), serde_json::json!(true));
                    data.insert("acquired".into(), serde_json::json!(acquired));
                    data.insert("released".into(), serde_json::json!(released));
                }
                SelectOutcome::Denied { shape_id, holder } => {
                    data.insert("granted".into(), serde_json::json!(false));
                    data.insert("shape_id".into(), serde_json::json!(shape_id));
                    data.insert("holder".into(), serde_json::to_value(holder).unwrap_or_default());
                }
                SelectOutcome::ReadOnly => {
                    data.insert("granted".into(), serde_json::json!(false));
                    data.insert("read_only".into(), serde_json::json!(true));
                }
                SelectOutcome::UnknownSession => return Err(req.error_from(&RoomError::NotJoined)),
            }
            Ok(Outcome::Reply(data))
        }
        "deselect" => {
            let ids: Option<Vec<ShapeId>> = optional(req, "ids")?;
            let released = room.deselect(session_id, ids).await.map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("released".into(), serde_json::json!(released));
            Ok(Outcome::Reply(data))
        }
        "create" => {
            let draft: ShapeDraft = field(req, "shape")?;
            edit(room, session_id, Edit::Create(draft.into_shape()), req).await
        }
        "update" => {
            let id: ShapeId = field(req, "id")?;
            let changes: BTreeMap<Field, FieldValue> = field(req, "changes")?;
            if changes.is_empty() {
                return Err(req.error("changes required"));
            }
            edit(room, session_id, Edit::Update { id, changes: changes.into_iter().collect() }, req).await
        }
        "delete" => {
            let ids: Vec<ShapeId> = field(req, "ids")?;
            edit(room, session_id, Edit::Delete(ids), req).await
        }
        op => Err(req.error(format!("unknown shape op: {op}"))),
    }
}

async fn edit(room: &RoomHandle, session_id: SessionId, edit: Edit, req: &Frame) -> Result<Outcome, Frame> {
    let outcome = room.edit(session_id, edit).await.map_err(|e| req.error_from(&e))?;
    let mut data = Data::new();
    match outcome {
        EditOutcome::Applied(changes) => {
            data.insert("applied".into(), serde_json::json!(true));
            data.insert("changes".into(), serde_json::to_value(changes).unwrap_or_default());
        }
        EditOutcome::Ignored => {
            data.insert("applied".into(), serde_json::json!(false));
        }
    }
    Ok(Outcome::Reply(data))
}

// =============================================================================
// AI HANDLER
// =============================================================================

fn handle_ai(conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room = joined(conn, req)?;
    match op(req) {
        "prompt" => {
            let command_id: String = field(req, "command_id")?;
            if command_id.trim().is_empty() {
                return Err(req.error("command_id required"));
            }
            let request = PromptRequest {
                command_id,
                prompt: field(req, "prompt")?,
                selection: optional(req, "selection")?,
                viewport: optional::<Viewport>(req, "viewport")?,
            };

            let room = room.clone();
            let session_id = conn.session_id;
            let client_tx = conn.client_tx.clone();
            let req = req.clone();
            tokio::spawn(async move {
                let reply = match room.prompt(session_id, request).await {
                    Ok(entry) => {
                        let mut data = Data::new();
                        data.insert("entry".into(), serde_json::to_value(&entry).unwrap_or_default());
                        req.done_with(data)
                    }
                    Err(e) => req.error_from(&e),
                };
                if client_tx.send(reply).await.is_err() {
                    warn!(%session_id, "ws: client gone before ai reply");
                }
            });
            Ok(Outcome::Deferred)
        }
        op => Err(req.error(format!("unknown ai op: {op}"))),
    }
}

// =============================================================================
// HISTORY + DOC HANDLERS
// =============================================================================

async fn handle_history(conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room = joined(conn, req)?;
    match op(req) {
        "list" => {
            let entries = room.history().await.map_err(|e| req.error_from(&e))?;
            let mut data = Data::new();
            data.insert("entries".into(), serde_json::to_value(entries).unwrap_or_default());
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown history op: {op}"))),
    }
}

async fn handle_doc(conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let room = joined(conn, req)?;
    match op(req) {
        "merge" => {
            let update: Update = field(req, "update")?;
            let delta = room.merge(conn.session_id, update).await.map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&delta)))
        }
        op => Err(req.error(format!("unknown doc op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get(FRAME_CODE).and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get(FRAME_MESSAGE).and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
