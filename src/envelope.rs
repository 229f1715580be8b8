// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Wire types for the application protocol.
//!
//! Messages carried inside websocket text frames use the envelope format:
//! `{"event": <string>, "data": <any>}`. Broadcast queue records are one
//! JSON object per LF-terminated line:
//! `{"type":"broadcast","event":..,"data":..,"namespace":..,"room":..|null}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `{event, data}` message envelope. Also used for handler replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub event: String,
	#[serde(default)]
	pub data: Value,
}

impl Envelope {
	pub fn new(event: impl Into<String>, data: Value) -> Self {
		Self {
			event: event.into(),
			data,
		}
	}

	/// The protocol-level error envelope sent when a route opted into
	/// error reporting.
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			event: "error".to_string(),
			data: serde_json::json!({"message": message.into()}),
		}
	}
}

/// One line of the broadcast queue file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
	#[serde(rename = "type")]
	pub kind: String,
	pub event: String,
	#[serde(default)]
	pub data: Value,
	pub namespace: String,
	#[serde(default)]
	pub room: Option<String>,
}

impl QueueRecord {
	pub fn broadcast(event: impl Into<String>, data: Value, namespace: impl Into<String>, room: Option<String>) -> Self {
		Self {
			kind: "broadcast".to_string(),
			event: event.into(),
			data,
			namespace: namespace.into(),
			room,
		}
	}
}

/// A broadcast described as a value: event name, target rooms, payload.
///
/// Handlers build one of these and hand it to the facade; with no rooms the
/// whole namespace is targeted.
#[derive(Debug, Clone)]
pub struct Broadcast {
	pub event: String,
	pub namespace: String,
	pub rooms: Vec<String>,
	pub data: Value,
}

impl Broadcast {
	pub fn new(event: impl Into<String>) -> Self {
		Self {
			event: event.into(),
			namespace: "/".to_string(),
			rooms: Vec::new(),
			data: Value::Null,
		}
	}

	pub fn namespace(mut self, ns: impl Into<String>) -> Self {
		self.namespace = ns.into();
		self
	}

	pub fn room(mut self, room: impl Into<String>) -> Self {
		self.rooms.push(room.into());
		self
	}

	pub fn data(mut self, data: Value) -> Self {
		self.data = data;
		self
	}
}
