// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Message dispatch: envelope decode, route lookup, middleware chains,
//! handler invocation, and reply/error translation.
//!
//! Handler and middleware failures are contained here; nothing below this
//! layer ever sees them.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
	config::CorsConfig,
	core::{
		connection::ClientId,
		state::{Core, ServerApi},
	},
	envelope::Envelope,
	protocol::http::{HttpRequest, HttpResponse},
	routing::{EventNext, HandlerResult, HandshakeNext, HandshakeOutcome, HttpNext, Router},
};

/// Context handed to websocket event handlers and middleware.
pub struct EventContext<'a> {
	core: &'a mut Core,
	pub client_id: ClientId,
	pub namespace: String,
	pub event: String,
	pub data: Value,
}

impl EventContext<'_> {
	/// The server facade; every operation on it is safe from inside a
	/// handler.
	pub fn server(&mut self) -> ServerApi<'_> {
		ServerApi::new(self.core)
	}
}

/// Context handed to HTTP handlers and middleware.
pub struct HttpContext<'a> {
	core: &'a mut Core,
	pub client_id: ClientId,
	/// Captured `:name` placeholder values.
	pub params: HashMap<String, String>,
}

impl HttpContext<'_> {
	pub fn server(&mut self) -> ServerApi<'_> {
		ServerApi::new(self.core)
	}

	pub fn param(&self, name: &str) -> Option<&str> {
		self.params.get(name).map(String::as_str)
	}
}

/// Context handed to handshake middleware while a connection upgrades.
/// The attribute bag written here survives into the open connection.
pub struct HandshakeContext<'a> {
	core: &'a mut Core,
	pub client_id: ClientId,
}

impl HandshakeContext<'_> {
	pub fn set_attr(&mut self, key: &str, value: Value) {
		let _ = self.core.set_client_data(self.client_id, key, value);
	}

	pub fn attr(&self, key: &str) -> Option<Value> {
		self.core.client_data(self.client_id, key)
	}
}

/// Dispatch one decoded envelope from `id`.
///
/// `synthetic` marks server-generated events (`connect`); those skip the
/// unknown-event fallback.
pub(crate) fn dispatch_event(core: &mut Core, router: &Router, id: ClientId, envelope: Envelope, synthetic: bool) {
	let namespace = core.namespace_of(id).unwrap_or_else(|| "/".to_string());

	let route = router
		.event(&envelope.event)
		.filter(|r| r.namespace.as_deref().map_or(true, |filter| filter == namespace));

	match route {
		Some(route) => {
			let mut ctx = EventContext {
				core: &mut *core,
				client_id: id,
				namespace,
				event: envelope.event.clone(),
				data: envelope.data,
			};
			let result = EventNext::new(&route.middleware, route.handler.as_ref()).run(&mut ctx);
			finish_event(core, id, &envelope.event, result, route.emit_errors);
		}
		None if synthetic => {}
		None => match &router.unknown_event {
			Some(handler) => {
				let mut ctx = EventContext {
					core: &mut *core,
					client_id: id,
					namespace,
					event: envelope.event.clone(),
					data: envelope.data,
				};
				let result = handler.handle(&mut ctx);
				finish_event(core, id, &envelope.event, result, false);
			}
			None => {
				debug!(client = %id, event = %envelope.event, "dropping event without route");
			}
		},
	}
}

fn finish_event(core: &mut Core, id: ClientId, event: &str, result: HandlerResult, emit_errors: bool) {
	match result {
		Ok(Some(reply)) => {
			if let Err(err) = core.send_envelope(id, &reply) {
				warn!(client = %id, event, %err, "failed to deliver reply");
			}
		}
		Ok(None) => {}
		Err(err) => {
			error!(client = %id, event, error = %err.message, "handler error");
			if emit_errors {
				if let Err(send_err) = core.send_envelope(id, &Envelope::error(err.message)) {
					warn!(client = %id, event, %send_err, "failed to deliver error event");
				}
			}
		}
	}
}

/// Dispatch a binary message to the configured binary handler, if any.
pub(crate) fn dispatch_binary(core: &mut Core, router: &Router, id: ClientId, payload: &[u8]) {
	let Some(handler) = &router.binary else {
		debug!(client = %id, bytes = payload.len(), "dropping binary message without handler");
		return;
	};
	let namespace = core.namespace_of(id).unwrap_or_else(|| "/".to_string());
	let mut ctx = EventContext {
		core,
		client_id: id,
		namespace,
		event: String::new(),
		data: Value::Null,
	};
	handler.handle(&mut ctx, payload);
}

/// Dispatch one HTTP request and produce the response to write.
pub(crate) fn dispatch_http(core: &mut Core, router: &Router, id: ClientId, req: &HttpRequest) -> HttpResponse {
	let mut response = match router.match_http(&req.method, &req.path) {
		Some((route, params)) => {
			let mut ctx = HttpContext {
				core: &mut *core,
				client_id: id,
				params,
			};
			match HttpNext::new(&route.middleware, route.handler.as_ref()).run(req, &mut ctx) {
				Ok(response) => response,
				Err(err) => {
					error!(client = %id, method = %req.method, path = %req.path, error = %err.message, "http handler error");
					HttpResponse::internal_error()
				}
			}
		}
		// Automatic preflight for routes that only exist under other
		// methods, and for pure CORS probes.
		None if req.method == "OPTIONS" => HttpResponse::no_content(),
		None => HttpResponse::not_found(),
	};

	if let Some(origin) = req.header("origin") {
		let cors = &core.config.cors;
		if cors.allows_origin(origin) {
			apply_cors(&mut response, origin, cors, req.method == "OPTIONS");
		}
	}
	response
}

fn apply_cors(response: &mut HttpResponse, origin: &str, cors: &CorsConfig, preflight: bool) {
	response.set_header("Access-Control-Allow-Origin", origin);
	if cors.allow_credentials {
		response.set_header("Access-Control-Allow-Credentials", "true");
	}
	if preflight {
		response.set_header("Access-Control-Allow-Methods", cors.allowed_methods.join(", "));
		response.set_header("Access-Control-Allow-Headers", cors.allowed_headers.join(", "));
		response.set_header("Access-Control-Max-Age", cors.max_age.to_string());
	}
}

/// Run the handshake middleware chain for an upgrading connection.
pub(crate) fn run_handshake(core: &mut Core, router: &Router, id: ClientId, req: &HttpRequest) -> HandshakeOutcome {
	let mut ctx = HandshakeContext {
		core,
		client_id: id,
	};
	HandshakeNext::new(&router.handshake).run(req, &mut ctx)
}

/// Replay a queue record through the normal broadcast path.
pub(crate) fn dispatch_queue_record(core: &mut Core, record: &crate::envelope::QueueRecord) {
	if record.kind != "broadcast" {
		warn!(kind = %record.kind, "skipping queue record of unknown type");
		return;
	}
	let delivered = core.broadcast(&record.event, &record.data, Some(&record.namespace), record.room.as_deref());
	debug!(event = %record.event, namespace = %record.namespace, delivered, "queue broadcast");
}
