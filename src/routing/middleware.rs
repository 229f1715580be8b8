// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Handler and middleware capability types.
//!
//! A handler is a single-operation value (`handle(ctx)`); middleware is the
//! same shape plus a `next` continuation it may invoke at most once. Not
//! calling `next` short-circuits the chain with the middleware's own
//! result. The `Next` values are consumed by `run`, which makes the
//! zero-or-one contract structural.

use std::sync::Arc;

use crate::{
	dispatch::{EventContext, HandshakeContext, HttpContext},
	envelope::Envelope,
	error::HandlerError,
	protocol::http::{HttpRequest, HttpResponse},
};

pub type HandlerResult = Result<Option<Envelope>, HandlerError>;
pub type HttpResult = Result<HttpResponse, HandlerError>;

/// A websocket event handler. The returned envelope, if any, is sent back
/// to the originating client.
pub trait EventHandler: Send + Sync {
	fn handle(&self, ctx: &mut EventContext<'_>) -> HandlerResult;
}

impl<F> EventHandler for F
where
	F: Fn(&mut EventContext<'_>) -> HandlerResult + Send + Sync,
{
	fn handle(&self, ctx: &mut EventContext<'_>) -> HandlerResult {
		self(ctx)
	}
}

pub trait EventMiddleware: Send + Sync {
	fn handle(&self, ctx: &mut EventContext<'_>, next: EventNext<'_>) -> HandlerResult;
}

impl<F> EventMiddleware for F
where
	F: Fn(&mut EventContext<'_>, EventNext<'_>) -> HandlerResult + Send + Sync,
{
	fn handle(&self, ctx: &mut EventContext<'_>, next: EventNext<'_>) -> HandlerResult {
		self(ctx, next)
	}
}

/// Continuation for the event middleware chain.
pub struct EventNext<'a> {
	chain: &'a [Arc<dyn EventMiddleware>],
	handler: &'a dyn EventHandler,
}

impl<'a> EventNext<'a> {
	pub(crate) fn new(chain: &'a [Arc<dyn EventMiddleware>], handler: &'a dyn EventHandler) -> Self {
		Self {
			chain,
			handler,
		}
	}

	pub fn run(self, ctx: &mut EventContext<'_>) -> HandlerResult {
		match self.chain.split_first() {
			Some((mw, rest)) => mw.handle(ctx, EventNext::new(rest, self.handler)),
			None => self.handler.handle(ctx),
		}
	}
}

/// An HTTP route handler.
pub trait HttpHandler: Send + Sync {
	fn handle(&self, req: &HttpRequest, ctx: &mut HttpContext<'_>) -> HttpResult;
}

impl<F> HttpHandler for F
where
	F: Fn(&HttpRequest, &mut HttpContext<'_>) -> HttpResult + Send + Sync,
{
	fn handle(&self, req: &HttpRequest, ctx: &mut HttpContext<'_>) -> HttpResult {
		self(req, ctx)
	}
}

pub trait HttpMiddleware: Send + Sync {
	fn handle(&self, req: &HttpRequest, ctx: &mut HttpContext<'_>, next: HttpNext<'_>) -> HttpResult;
}

impl<F> HttpMiddleware for F
where
	F: Fn(&HttpRequest, &mut HttpContext<'_>, HttpNext<'_>) -> HttpResult + Send + Sync,
{
	fn handle(&self, req: &HttpRequest, ctx: &mut HttpContext<'_>, next: HttpNext<'_>) -> HttpResult {
		self(req, ctx, next)
	}
}

/// Continuation for the HTTP middleware chain.
pub struct HttpNext<'a> {
	chain: &'a [Arc<dyn HttpMiddleware>],
	handler: &'a dyn HttpHandler,
}

impl<'a> HttpNext<'a> {
	pub(crate) fn new(chain: &'a [Arc<dyn HttpMiddleware>], handler: &'a dyn HttpHandler) -> Self {
		Self {
			chain,
			handler,
		}
	}

	pub fn run(self, req: &HttpRequest, ctx: &mut HttpContext<'_>) -> HttpResult {
		match self.chain.split_first() {
			Some((mw, rest)) => mw.handle(req, ctx, HttpNext::new(rest, self.handler)),
			None => self.handler.handle(req, ctx),
		}
	}
}

/// Decision of a handshake middleware chain.
#[derive(Debug)]
pub enum HandshakeOutcome {
	/// Accept the upgrade (the default when the chain runs out).
	Continue,
	/// Reject with a 403.
	Reject,
	/// Reject with a caller-provided response.
	Custom(HttpResponse),
}

pub trait HandshakeMiddleware: Send + Sync {
	fn handle(&self, req: &HttpRequest, ctx: &mut HandshakeContext<'_>, next: HandshakeNext<'_>) -> HandshakeOutcome;
}

impl<F> HandshakeMiddleware for F
where
	F: Fn(&HttpRequest, &mut HandshakeContext<'_>, HandshakeNext<'_>) -> HandshakeOutcome + Send + Sync,
{
	fn handle(&self, req: &HttpRequest, ctx: &mut HandshakeContext<'_>, next: HandshakeNext<'_>) -> HandshakeOutcome {
		self(req, ctx, next)
	}
}

/// Continuation for the handshake middleware chain.
pub struct HandshakeNext<'a> {
	chain: &'a [Arc<dyn HandshakeMiddleware>],
}

impl<'a> HandshakeNext<'a> {
	pub(crate) fn new(chain: &'a [Arc<dyn HandshakeMiddleware>]) -> Self {
		Self {
			chain,
		}
	}

	pub fn run(self, req: &HttpRequest, ctx: &mut HandshakeContext<'_>) -> HandshakeOutcome {
		match self.chain.split_first() {
			Some((mw, rest)) => mw.handle(req, ctx, HandshakeNext::new(rest)),
			None => HandshakeOutcome::Continue,
		}
	}
}
