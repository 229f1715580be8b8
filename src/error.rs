// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Error taxonomy shared across the server.
//!
//! Connection-scoped errors ([`ProtocolError`]) close exactly one connection
//! and never unwind across the reactor. [`SendError`] is surfaced to the
//! caller of a facade operation. [`ServerError`] is fatal before or during
//! `run()`.

use crate::core::connection::ClientId;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or driving a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),

	#[error("malformed websocket frame: {0}")]
	BadFrame(&'static str),

	#[error("message exceeds configured size limit")]
	MessageTooBig,

	#[error("malformed http request: {0}")]
	BadHttp(String),

	#[error("invalid websocket handshake: {0}")]
	BadHandshake(String),

	#[error("connection closed by peer")]
	ConnectionClosed,

	#[error("read buffer limit exceeded")]
	BufferOverflow,
}

impl ProtocolError {
	/// WebSocket close code this error maps to when the connection is
	/// still in the open state.
	pub fn close_code(&self) -> u16 {
		match self {
			Self::MessageTooBig => 1009,
			_ => 1002,
		}
	}
}

/// Errors returned from facade send-side operations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
	/// The per-connection write buffer would overflow. The connection
	/// stays open; the caller decides what to do.
	#[error("write buffer full")]
	Backpressured,

	#[error("unknown client {0}")]
	UnknownClient(ClientId),

	#[error("client {0} is not an open websocket connection")]
	NotWebSocket(ClientId),
}

/// Fatal server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("bind failed: {0}")]
	Bind(#[source] std::io::Error),

	#[error("reactor failure: {0}")]
	Reactor(#[source] std::io::Error),
}

/// Error returned by user handlers and middleware. Caught by the
/// dispatcher, logged, and optionally translated into an error event or a
/// 500 response. Never reaches the reactor.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
	pub message: String,
}

impl HandlerError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

impl From<String> for HandlerError {
	fn from(message: String) -> Self {
		Self {
			message,
		}
	}
}

impl From<&str> for HandlerError {
	fn from(message: &str) -> Self {
		Self {
			message: message.to_string(),
		}
	}
}

impl From<serde_json::Error> for HandlerError {
	fn from(err: serde_json::Error) -> Self {
		Self {
			message: err.to_string(),
		}
	}
}
