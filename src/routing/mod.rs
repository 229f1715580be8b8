// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Routing tables for HTTP requests and websocket events.
//!
//! Registration happens before `run()`; at that point the router is frozen
//! behind an `Arc` and lookups are read-only.

pub mod middleware;
pub mod pattern;

use std::{collections::HashMap, sync::Arc};

use crate::error::ServerError;

pub use middleware::{
	EventHandler, EventMiddleware, EventNext, HandlerResult, HandshakeMiddleware, HandshakeNext, HandshakeOutcome,
	HttpHandler, HttpMiddleware, HttpNext, HttpResult,
};
pub use pattern::PathPattern;

pub(crate) struct HttpRoute {
	pub method: String,
	pub pattern: PathPattern,
	pub handler: Arc<dyn HttpHandler>,
	pub middleware: Vec<Arc<dyn HttpMiddleware>>,
	index: usize,
}

pub(crate) struct EventRoute {
	pub handler: Arc<dyn EventHandler>,
	pub middleware: Vec<Arc<dyn EventMiddleware>>,
	/// When set, the route only fires for clients in this namespace.
	pub namespace: Option<String>,
	/// Translate handler errors into an `error` event to the client.
	pub emit_errors: bool,
}

/// Options for a websocket event route.
#[derive(Default)]
pub struct EventOptions {
	pub middleware: Vec<Arc<dyn EventMiddleware>>,
	pub namespace: Option<String>,
	pub emit_errors: bool,
}

impl EventOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn middleware(mut self, mw: impl EventMiddleware + 'static) -> Self {
		self.middleware.push(Arc::new(mw));
		self
	}

	pub fn namespace(mut self, ns: impl Into<String>) -> Self {
		self.namespace = Some(ns.into());
		self
	}

	pub fn emit_errors(mut self, emit: bool) -> Self {
		self.emit_errors = emit;
		self
	}
}

/// Handler for binary websocket frames, delivered opaquely.
pub trait BinaryHandler: Send + Sync {
	fn handle(&self, ctx: &mut crate::dispatch::EventContext<'_>, payload: &[u8]);
}

impl<F> BinaryHandler for F
where
	F: Fn(&mut crate::dispatch::EventContext<'_>, &[u8]) + Send + Sync,
{
	fn handle(&self, ctx: &mut crate::dispatch::EventContext<'_>, payload: &[u8]) {
		self(ctx, payload)
	}
}

#[derive(Default)]
pub struct Router {
	http: Vec<HttpRoute>,
	events: HashMap<String, EventRoute>,
	pub(crate) unknown_event: Option<Arc<dyn EventHandler>>,
	pub(crate) binary: Option<Arc<dyn BinaryHandler>>,
	pub(crate) handshake: Vec<Arc<dyn HandshakeMiddleware>>,
}

impl Router {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an HTTP route. Patterns use literal segments and `:name`
	/// placeholders, e.g. `/users/:id`.
	pub fn route(
		&mut self,
		method: &str,
		pattern: &str,
		handler: impl HttpHandler + 'static,
	) -> Result<&mut Self, ServerError> {
		self.route_with(method, pattern, Vec::new(), handler)
	}

	pub fn route_with(
		&mut self,
		method: &str,
		pattern: &str,
		middleware: Vec<Arc<dyn HttpMiddleware>>,
		handler: impl HttpHandler + 'static,
	) -> Result<&mut Self, ServerError> {
		let pattern = PathPattern::parse(pattern)?;
		let index = self.http.len();
		self.http.push(HttpRoute {
			method: method.to_ascii_uppercase(),
			pattern,
			handler: Arc::new(handler),
			middleware,
			index,
		});
		Ok(self)
	}

	/// Register a websocket event handler.
	pub fn on(&mut self, event: &str, handler: impl EventHandler + 'static) -> &mut Self {
		self.on_with(event, EventOptions::new(), handler)
	}

	pub fn on_with(&mut self, event: &str, options: EventOptions, handler: impl EventHandler + 'static) -> &mut Self {
		self.events.insert(
			event.to_string(),
			EventRoute {
				handler: Arc::new(handler),
				middleware: options.middleware,
				namespace: options.namespace,
				emit_errors: options.emit_errors,
			},
		);
		self
	}

	/// Handler invoked for events with no registered route. Without one,
	/// unknown events are dropped.
	pub fn on_unknown_event(&mut self, handler: impl EventHandler + 'static) -> &mut Self {
		self.unknown_event = Some(Arc::new(handler));
		self
	}

	/// Handler for binary frames. Without one, binary messages are
	/// dropped.
	pub fn on_binary(&mut self, handler: impl BinaryHandler + 'static) -> &mut Self {
		self.binary = Some(Arc::new(handler));
		self
	}

	/// Append a handshake middleware; the chain runs in registration
	/// order during every upgrade.
	pub fn handshake(&mut self, middleware: impl HandshakeMiddleware + 'static) -> &mut Self {
		self.handshake.push(Arc::new(middleware));
		self
	}

	/// Find the best HTTP route for `(method, path)`.
	///
	/// Specificity: more literal segments, then longer pattern, then
	/// earlier registration.
	pub(crate) fn match_http(&self, method: &str, path: &str) -> Option<(&HttpRoute, HashMap<String, String>)> {
		let mut best: Option<(&HttpRoute, HashMap<String, String>)> = None;
		for route in &self.http {
			if route.method != method {
				continue;
			}
			let Some(params) = route.pattern.matches(path) else {
				continue;
			};
			let better = match &best {
				None => true,
				Some((current, _)) => {
					let (a, b) = (route.pattern.specificity(), current.pattern.specificity());
					a > b || (a == b && route.index < current.index)
				}
			};
			if better {
				best = Some((route, params));
			}
		}
		best
	}

	pub(crate) fn event(&self, name: &str) -> Option<&EventRoute> {
		self.events.get(name)
	}
}
