// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Server lifecycle: configure, register routes, bind, run, shutdown.
//!
//! ```no_run
//! use serde_json::json;
//! use wavehub::{HttpContext, HttpRequest, HttpResponse, HttpResult, Server, ServerConfig};
//!
//! fn health(_req: &HttpRequest, _ctx: &mut HttpContext<'_>) -> HttpResult {
//! 	Ok(HttpResponse::json(&json!({"ok": true})))
//! }
//!
//! let mut server = Server::new(ServerConfig::new().port(0));
//! server.router_mut().route("GET", "/health", health).unwrap();
//! server.bind().unwrap();
//! server.run().unwrap();
//! ```

use std::{
	net::SocketAddr,
	sync::{
		atomic::AtomicBool,
		Arc,
	},
};

use mio::{Poll, Waker};
use tracing::info;

use crate::{
	config::ServerConfig,
	core::{
		listener::bind_listener,
		reactor::{Reactor, ShutdownHandle, WAKER},
		state::Core,
	},
	error::ServerError,
	routing::Router,
};

pub struct Server {
	config: ServerConfig,
	router: Router,
	bound: Option<Bound>,
}

struct Bound {
	listener: std::net::TcpListener,
	addr: SocketAddr,
	poll: Poll,
	shutdown: Arc<AtomicBool>,
	handle: ShutdownHandle,
}

impl Server {
	pub fn new(config: ServerConfig) -> Self {
		Self {
			config,
			router: Router::new(),
			bound: None,
		}
	}

	/// The routing tables. Registration only makes sense before `run()`;
	/// the router is frozen once the reactor starts.
	pub fn router_mut(&mut self) -> &mut Router {
		&mut self.router
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	/// Validate configuration and open the listening socket. Fatal on
	/// misconfiguration or an unbindable address.
	pub fn bind(&mut self) -> Result<SocketAddr, ServerError> {
		if let Some(bound) = &self.bound {
			return Ok(bound.addr);
		}

		self.config.validate()?;
		let listener = bind_listener(&self.config.host, self.config.port)?;
		let addr = listener.local_addr().map_err(ServerError::Bind)?;

		let poll = Poll::new().map_err(ServerError::Reactor)?;
		let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Reactor)?;
		let shutdown = Arc::new(AtomicBool::new(false));
		let handle = ShutdownHandle::new(Arc::clone(&shutdown), Arc::new(waker));

		info!(%addr, "listening");
		self.bound = Some(Bound {
			listener,
			addr,
			poll,
			shutdown,
			handle,
		});
		Ok(addr)
	}

	/// Address actually bound; useful with port 0.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		self.bound.as_ref().map(|b| b.addr)
	}

	/// Handle for stopping the server from another thread or a signal
	/// handler. Available after `bind()`.
	pub fn shutdown_handle(&mut self) -> Result<ShutdownHandle, ServerError> {
		self.bind()?;
		Ok(self.bound.as_ref().expect("bound after bind()").handle.clone())
	}

	/// Run the reactor on the calling thread until a shutdown handle
	/// fires. Consumes the server; registration is closed from here on.
	pub fn run(mut self) -> Result<(), ServerError> {
		self.bind()?;
		let bound = self.bound.take().expect("bound after bind()");

		let core = Core::new(self.config);
		let router = Arc::new(self.router);
		let mut reactor = Reactor::new(bound.poll, bound.listener, core, router, bound.shutdown)?;
		reactor.run()
	}
}
