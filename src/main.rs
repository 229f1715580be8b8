// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! wavehub server binary.
//!
//! SIGINT/SIGTERM trigger a graceful shutdown: open websocket clients get
//! close 1001 and write buffers drain under the configured deadline.
//!
//! Exit codes: 0 on clean shutdown, 2 when the listener cannot bind,
//! 3 on an unrecoverable reactor failure.

use serde_json::json;
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wavehub::{
	Envelope, EventContext, HandlerResult, HttpContext, HttpRequest, HttpResponse, HttpResult, Server, ServerConfig,
	ServerError,
};

fn health(_req: &HttpRequest, _ctx: &mut HttpContext<'_>) -> HttpResult {
	Ok(HttpResponse::json(&json!({"ok": true})))
}

fn ping(_ctx: &mut EventContext<'_>) -> HandlerResult {
	Ok(Some(Envelope::new("pong", json!({}))))
}

fn config_from_env() -> ServerConfig {
	let mut config = ServerConfig::new();
	if let Ok(host) = std::env::var("WAVEHUB_HOST") {
		config = config.host(host);
	}
	if let Ok(port) = std::env::var("WAVEHUB_PORT") {
		match port.parse() {
			Ok(port) => config = config.port(port),
			Err(_) => error!(%port, "ignoring unparseable WAVEHUB_PORT"),
		}
	}
	if let Ok(path) = std::env::var("WAVEHUB_QUEUE_FILE") {
		config = config.queue(wavehub::QueueConfig::default().file(path));
	}
	config
}

fn main() {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(fmt::layer().with_target(true))
		.init();

	let mut server = Server::new(config_from_env());
	server.router_mut().on("ping", ping);
	if let Err(err) = server.router_mut().route("GET", "/health", health) {
		error!(%err, "failed to register health route");
		std::process::exit(2);
	}

	if let Err(err) = server.bind() {
		error!(%err, "bind failed");
		std::process::exit(2);
	}

	let shutdown = match server.shutdown_handle() {
		Ok(handle) => handle,
		Err(err) => {
			error!(%err, "no shutdown handle");
			std::process::exit(2);
		}
	};
	if let Err(err) = ctrlc::set_handler(move || shutdown.shutdown()) {
		error!(%err, "failed to install signal handler");
		std::process::exit(2);
	}

	match server.run() {
		Ok(()) => {}
		Err(err @ ServerError::Reactor(_)) => {
			error!(%err, "reactor failed");
			std::process::exit(3);
		}
		Err(err) => {
			error!(%err, "server failed");
			std::process::exit(2);
		}
	}
}
