//! Frame: the websocket envelope.
//!
//! DESIGN
//! ======
//! Clients send `request` frames; every request is answered with
//! `item* → done` or a single `error`, correlated by `parent_id`. Room
//! broadcasts (shape changes, lock changes, history appends) are unsolicited
//! `item` frames with no parent. The payload is a flat key/value map; the
//! socket handler routes on `syscall` and each handler reads its own keys.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const FRAME_MESSAGE: &str = "message";
pub const FRAME_CODE: &str = "code";
pub const FRAME_RETRYABLE: &str = "retryable";

pub type Data = HashMap<String, serde_json::Value>;

/// Position of a frame in a request/response stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Item,
    Done,
    Error,
}

impl Status {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Grepable error code and retryable flag for error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Wall-clock milliseconds since Unix epoch, or 0 if the clock is before it.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self::new(None, syscall.into(), Status::Request, data)
    }

    /// Unsolicited server push.
    pub fn push(syscall: impl Into<String>, data: Data) -> Self {
        Self::new(None, syscall.into(), Status::Item, data)
    }

    fn new(parent_id: Option<Uuid>, syscall: String, status: Status, data: Data) -> Self {
        Self { id: Uuid::new_v4(), parent_id, ts: now_ms(), room_id: None, from: None, syscall, status, data }
    }

    #[must_use]
    pub fn item(&self, data: Data) -> Self {
        self.reply(Status::Item, data)
    }

    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Reply inheriting `room_id` and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        let mut frame = Self::new(Some(self.id), self.syscall.clone(), status, data);
        frame.room_id.clone_from(&self.room_id);
        frame
    }

    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Everything before the first ':' of the syscall.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
