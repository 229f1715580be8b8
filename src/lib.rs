// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! wavehub is a self-contained real-time event server: one listening
//! socket, HTTP/1.1 and WebSocket side by side, `{event, data}` message
//! dispatch to handlers organized by namespace and room, and a file-backed
//! queue through which external processes broadcast without holding a
//! socket.
//!
//! The runtime is a single-threaded cooperative reactor. Handlers run on
//! the reactor thread and reach the server through the facade on their
//! context; a handler that blocks pauses the whole server. Offload slow
//! work to another thread or process and deliver the result as a
//! follow-up event through the broadcast queue ([`Publisher`]) — that is
//! the only async escape hatch. The one cross-thread primitive is
//! [`ShutdownHandle`].

pub mod config;
pub mod core;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod rooms;
pub mod routing;

pub use crate::{
	config::{CorsConfig, QueueConfig, ServerConfig},
	core::{ClientId, ClientKind, Server, ServerApi, ShutdownHandle},
	dispatch::{EventContext, HandshakeContext, HttpContext},
	envelope::{Broadcast, Envelope, QueueRecord},
	error::{HandlerError, ProtocolError, SendError, ServerError},
	protocol::http::{HttpRequest, HttpResponse},
	queue::Publisher,
	routing::{
		BinaryHandler, EventHandler, EventMiddleware, EventNext, EventOptions, HandlerResult,
		HandshakeMiddleware, HandshakeNext, HandshakeOutcome, HttpHandler, HttpMiddleware, HttpNext, HttpResult,
		Router,
	},
};
