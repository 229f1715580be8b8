// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Server configuration.
//!
//! All options are code-built with chainable setters; validation happens at
//! bind time so misconfiguration is fatal before the reactor starts.

use std::{path::PathBuf, time::Duration};

use crate::error::ServerError;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	/// Listener host.
	pub host: String,
	/// Listener port. 0 asks the OS for an ephemeral port.
	pub port: u16,
	/// Close a connection after this long without any inbound traffic.
	pub idle_timeout: Duration,
	/// Send a ping after this long of websocket inactivity.
	pub ping_interval: Duration,
	/// Close 1001 when no pong arrives within this window after a ping.
	pub ping_timeout: Duration,
	/// Maximum size of a single websocket frame payload.
	pub max_frame_bytes: usize,
	/// Maximum size of a reassembled websocket message.
	pub max_message_bytes: usize,
	/// Per-connection outbound buffer bound. Sends that would overflow it
	/// fail with `Backpressured`.
	pub write_buffer_bytes: usize,
	/// Maximum connections accepted per reactor tick.
	pub accept_batch: usize,
	/// Per-socket per-tick read/write byte bound.
	pub io_chunk_bytes: usize,
	/// Deadline for draining write buffers during shutdown.
	pub shutdown_timeout: Duration,
	pub cors: CorsConfig,
	pub queue: QueueConfig,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 8080,
			idle_timeout: Duration::from_secs(300),
			ping_interval: Duration::from_secs(30),
			ping_timeout: Duration::from_secs(10),
			max_frame_bytes: 2 << 20,
			max_message_bytes: 2 << 20,
			write_buffer_bytes: 1 << 20,
			accept_batch: 64,
			io_chunk_bytes: 64 << 10,
			shutdown_timeout: Duration::from_secs(5),
			cors: CorsConfig::default(),
			queue: QueueConfig::default(),
		}
	}
}

impl ServerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn host(mut self, host: impl Into<String>) -> Self {
		self.host = host.into();
		self
	}

	pub fn port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	pub fn idle_timeout(mut self, timeout: Duration) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn ping_interval(mut self, interval: Duration) -> Self {
		self.ping_interval = interval;
		self
	}

	pub fn ping_timeout(mut self, timeout: Duration) -> Self {
		self.ping_timeout = timeout;
		self
	}

	pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
		self.max_frame_bytes = bytes;
		self
	}

	pub fn max_message_bytes(mut self, bytes: usize) -> Self {
		self.max_message_bytes = bytes;
		self
	}

	pub fn write_buffer_bytes(mut self, bytes: usize) -> Self {
		self.write_buffer_bytes = bytes;
		self
	}

	pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
		self.shutdown_timeout = timeout;
		self
	}

	pub fn cors(mut self, cors: CorsConfig) -> Self {
		self.cors = cors;
		self
	}

	pub fn queue(mut self, queue: QueueConfig) -> Self {
		self.queue = queue;
		self
	}

	pub(crate) fn validate(&self) -> Result<(), ServerError> {
		if self.host.is_empty() {
			return Err(ServerError::Configuration("host must not be empty".to_string()));
		}
		if self.max_frame_bytes == 0 || self.max_message_bytes == 0 {
			return Err(ServerError::Configuration("frame and message limits must be non-zero".to_string()));
		}
		if self.max_message_bytes < self.max_frame_bytes {
			return Err(ServerError::Configuration(
				"max_message_bytes must be at least max_frame_bytes".to_string(),
			));
		}
		if self.write_buffer_bytes == 0 {
			return Err(ServerError::Configuration("write_buffer_bytes must be non-zero".to_string()));
		}
		if self.queue.enabled && self.queue.file.is_none() {
			return Err(ServerError::Configuration("queue.enabled requires queue.file".to_string()));
		}
		Ok(())
	}
}

/// CORS policy applied to HTTP responses and OPTIONS preflights.
#[derive(Debug, Clone)]
pub struct CorsConfig {
	/// Allowed origins. `"*"` allows any origin.
	pub allowed_origins: Vec<String>,
	pub allowed_methods: Vec<String>,
	pub allowed_headers: Vec<String>,
	/// Preflight cache lifetime in seconds.
	pub max_age: u32,
	pub allow_credentials: bool,
}

impl Default for CorsConfig {
	fn default() -> Self {
		Self {
			allowed_origins: Vec::new(),
			allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"].map(String::from).to_vec(),
			allowed_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
			max_age: 86_400,
			allow_credentials: false,
		}
	}
}

impl CorsConfig {
	pub fn allow_origins<I, S>(mut self, origins: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_origins = origins.into_iter().map(Into::into).collect();
		self
	}

	pub fn allow_credentials(mut self, allow: bool) -> Self {
		self.allow_credentials = allow;
		self
	}

	pub fn max_age(mut self, seconds: u32) -> Self {
		self.max_age = seconds;
		self
	}

	pub fn allows_origin(&self, origin: &str) -> bool {
		self.allowed_origins.iter().any(|o| o == "*" || o == origin)
	}
}

/// Broadcast queue file configuration.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
	/// Path of the append-only JSON-per-line queue file.
	pub file: Option<PathBuf>,
	pub enabled: bool,
}

impl QueueConfig {
	pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
		self.file = Some(path.into());
		self.enabled = true;
		self
	}
}
