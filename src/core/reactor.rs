// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! The single-threaded event loop.
//!
//! One tick: drain readiness events (accept / read / write), poll the
//! broadcast queue, sweep timeouts, reconcile poll interests, reap closed
//! connections. All handler code runs on this thread; connection-scoped
//! failures close one connection and nothing else.

use std::{
	io::Read,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

use mio::{
	net::TcpListener,
	Events, Interest, Poll, Token, Waker,
};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::{
	core::{
		connection::{ClientId, ClientKind, ConnState, Connection},
		state::Core,
	},
	dispatch,
	envelope::Envelope,
	error::{ProtocolError, ServerError},
	protocol::{
		frame::{self, Opcode},
		handshake,
		http::{self, HttpResponse, Parsed},
	},
	queue::QueueReader,
	routing::{HandshakeOutcome, Router},
};

pub(crate) const LISTENER: Token = Token(0);
pub(crate) const WAKER: Token = Token(1);
pub(crate) const TOKEN_BASE: usize = 2;

/// Poll timeout; bounds queue and timeout latency while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Thread-safe trampoline that stops a running server. The only wavehub
/// value that may cross threads.
#[derive(Clone)]
pub struct ShutdownHandle {
	flag: Arc<AtomicBool>,
	waker: Arc<Waker>,
}

impl ShutdownHandle {
	pub(crate) fn new(flag: Arc<AtomicBool>, waker: Arc<Waker>) -> Self {
		Self {
			flag,
			waker,
		}
	}

	/// Ask the reactor to stop. Idempotent; safe from any thread or from
	/// a signal handler.
	pub fn shutdown(&self) {
		self.flag.store(true, Ordering::Relaxed);
		if let Err(err) = self.waker.wake() {
			warn!(%err, "failed to wake reactor for shutdown");
		}
	}
}

/// One complete websocket input extracted from the read buffer.
enum WsInput {
	Message(Opcode, Vec<u8>),
	Ping(Vec<u8>),
	Pong,
	Close(Vec<u8>),
}

enum WsStep {
	NeedMore,
	Consumed,
	Input(WsInput),
}

pub(crate) struct Reactor {
	poll: Poll,
	events: Events,
	listener: TcpListener,
	core: Core,
	router: Arc<Router>,
	queue: Option<QueueReader>,
	shutdown: Arc<AtomicBool>,
}

impl Reactor {
	pub fn new(
		poll: Poll,
		listener: std::net::TcpListener,
		core: Core,
		router: Arc<Router>,
		shutdown: Arc<AtomicBool>,
	) -> Result<Self, ServerError> {
		let mut listener = TcpListener::from_std(listener);
		poll.registry()
			.register(&mut listener, LISTENER, Interest::READABLE)
			.map_err(ServerError::Reactor)?;

		let queue = if core.config.queue.enabled {
			core.config.queue.file.clone().map(QueueReader::new)
		} else {
			None
		};

		Ok(Self {
			poll,
			events: Events::with_capacity(1024),
			listener,
			core,
			router,
			queue,
			shutdown,
		})
	}

	/// Run until shutdown is requested. Only poll failures are fatal.
	pub fn run(&mut self) -> Result<(), ServerError> {
		info!("reactor running");

		while !self.shutdown.load(Ordering::Relaxed) {
			if let Err(err) = self.poll.poll(&mut self.events, Some(POLL_INTERVAL)) {
				if err.kind() == std::io::ErrorKind::Interrupted {
					continue;
				}
				return Err(ServerError::Reactor(err));
			}

			let ready: Vec<(Token, bool, bool)> = self
				.events
				.iter()
				.map(|e| (e.token(), e.is_readable(), e.is_writable()))
				.collect();

			for (token, readable, writable) in ready {
				match token {
					LISTENER => self.accept_batch(),
					WAKER => {}
					token => self.connection_event(token, readable, writable),
				}
			}

			self.drive_pending_reads();
			self.poll_queue();
			self.sweep_timeouts();
			self.update_interests();
			self.reap_closed();
		}

		self.graceful_shutdown();
		Ok(())
	}

	fn accept_batch(&mut self) {
		for _ in 0..self.core.config.accept_batch {
			match self.listener.accept() {
				Ok((mut stream, peer)) => {
					if let Err(err) = stream.set_nodelay(true) {
						trace!(%err, "set_nodelay failed");
					}
					let id = self.core.alloc_id();
					let entry = self.core.clients.vacant_entry();
					let key = entry.key();
					let token = Token(TOKEN_BASE + key);
					if let Err(err) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
						warn!(%err, "failed to register accepted socket");
						continue;
					}
					entry.insert(Connection::new(id, stream, token));
					self.core.keys.insert(id, key);
					debug!(client = %id, %peer, "accepted connection");
				}
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
				Err(err) => {
					warn!(%err, "accept failed");
					break;
				}
			}
		}
	}

	fn connection_event(&mut self, token: Token, readable: bool, writable: bool) {
		let Some(key) = token.0.checked_sub(TOKEN_BASE) else {
			return;
		};
		if !self.core.clients.contains(key) {
			return;
		}

		if readable {
			if let Err(err) = self.read_ready(key) {
				self.fail_connection(key, err);
			}
		}
		if writable && self.core.clients.contains(key) {
			if let Err(err) = self.write_ready(key) {
				self.fail_connection(key, err);
			}
		}
	}

	/// Pull bytes from the socket (bounded per tick) and run the FSM over
	/// whatever the buffer now holds.
	fn read_ready(&mut self, key: usize) -> Result<(), ProtocolError> {
		let chunk_limit = self.core.config.io_chunk_bytes;
		// Generous slack above the message limit for frame and request
		// headers.
		let buf_cap = self.core.config.max_message_bytes + (64 << 10);

		{
			let conn = &mut self.core.clients[key];
			conn.read_pending = false;
			if matches!(conn.state, ConnState::ReadingHttp | ConnState::WsOpen) {
				let mut read_total = 0usize;
				let mut chunk = [0u8; 4096];
				loop {
					if conn.read_paused {
						break;
					}
					if read_total >= chunk_limit {
						// Fairness bound hit with data possibly
						// still queued; edge-triggered polls will
						// not re-announce it.
						conn.read_pending = true;
						break;
					}
					match conn.stream.read(&mut chunk) {
						Ok(0) => return Err(ProtocolError::ConnectionClosed),
						Ok(n) => {
							conn.read_buf.extend_from_slice(&chunk[..n]);
							conn.touch();
							read_total += n;
							if conn.read_buf.len() > buf_cap {
								return Err(ProtocolError::BufferOverflow);
							}
						}
						Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
						Err(err) => return Err(ProtocolError::Io(err)),
					}
				}
			}
		}

		self.drive(key)
	}

	/// Step the protocol FSM until it stops making progress.
	fn drive(&mut self, key: usize) -> Result<(), ProtocolError> {
		loop {
			let state = match self.core.clients.get(key) {
				Some(conn) => conn.state,
				None => return Ok(()),
			};
			let progressed = match state {
				ConnState::ReadingHttp => self.drive_http(key)?,
				ConnState::WsOpen => self.drive_ws(key)?,
				_ => false,
			};
			if !progressed {
				return Ok(());
			}
		}
	}

	fn drive_http(&mut self, key: usize) -> Result<bool, ProtocolError> {
		let request = {
			let conn = &mut self.core.clients[key];
			if conn.read_buf.is_empty() {
				return Ok(false);
			}
			match http::parse_request(&conn.read_buf)? {
				Parsed::Partial => return Ok(false),
				Parsed::Complete(request, consumed) => {
					conn.read_buf.drain(..consumed);
					request
				}
			}
		};

		let id = self.core.clients[key].id;
		let router = Arc::clone(&self.router);

		if handshake::is_upgrade_request(&request) {
			self.handle_upgrade(key, id, &router, &request);
		} else {
			self.core.clients[key].kind = ClientKind::Http;
			let response = dispatch::dispatch_http(&mut self.core, &router, id, &request);
			let close_after = !response.keep_alive;
			// The handler may have disconnected the client.
			if let Some(conn) = self.core.clients.get_mut(key) {
				if conn.state == ConnState::ReadingHttp {
					conn.enqueue_unbounded(response.to_bytes());
					conn.state = ConnState::HttpResponding {
						close_after,
					};
				}
			}
		}
		Ok(true)
	}

	fn handle_upgrade(&mut self, key: usize, id: ClientId, router: &Router, request: &http::HttpRequest) {
		let accept = match handshake::validate_upgrade(request) {
			Ok(accept) => accept,
			Err(err) => {
				warn!(client = %id, %err, "invalid websocket handshake");
				let conn = &mut self.core.clients[key];
				conn.enqueue_unbounded(
					HttpResponse::new(400).with_body(err.to_string().into_bytes()).to_bytes(),
				);
				conn.state = ConnState::HttpResponding {
					close_after: true,
				};
				return;
			}
		};

		self.core.clients[key].state = ConnState::Upgrading;
		match dispatch::run_handshake(&mut self.core, router, id, request) {
			HandshakeOutcome::Continue => {
				{
					let conn = &mut self.core.clients[key];
					conn.enqueue_unbounded(handshake::switching_protocols(&accept).to_bytes());
					conn.kind = ClientKind::Ws;
					conn.state = ConnState::WsOpen;
				}
				self.core.index.join_namespace(id, "/");
				// `auth.userId` is the reserved attribute handshake
				// middleware uses for identity.
				match self.core.client_data(id, "auth.userId") {
					Some(user) => {
						debug!(client = %id, path = %request.path, user = %user, "websocket open")
					}
					None => debug!(client = %id, path = %request.path, "websocket open"),
				}
				dispatch::dispatch_event(&mut self.core, router, id, Envelope::new("connect", Value::Null), true);
			}
			HandshakeOutcome::Reject => {
				info!(client = %id, "websocket handshake rejected");
				let conn = &mut self.core.clients[key];
				conn.enqueue_unbounded(HttpResponse::forbidden().to_bytes());
				conn.state = ConnState::HttpResponding {
					close_after: true,
				};
			}
			HandshakeOutcome::Custom(response) => {
				info!(client = %id, status = response.status, "websocket handshake answered by middleware");
				let conn = &mut self.core.clients[key];
				conn.enqueue_unbounded(response.to_bytes());
				conn.state = ConnState::HttpResponding {
					close_after: true,
				};
			}
		}
	}

	fn drive_ws(&mut self, key: usize) -> Result<bool, ProtocolError> {
		let max_frame = self.core.config.max_frame_bytes;
		let max_message = self.core.config.max_message_bytes;

		let step = {
			let conn = &mut self.core.clients[key];
			match frame::decode(&conn.read_buf, max_frame, true)? {
				None => WsStep::NeedMore,
				Some((frame, consumed)) => {
					conn.read_buf.drain(..consumed);
					match frame.opcode {
						Opcode::Ping => WsStep::Input(WsInput::Ping(frame.payload)),
						Opcode::Pong => {
							conn.ping_sent = None;
							conn.touch();
							WsStep::Input(WsInput::Pong)
						}
						Opcode::Close => WsStep::Input(WsInput::Close(frame.payload)),
						Opcode::Text | Opcode::Binary => {
							if conn.pending_opcode.is_some() {
								return Err(ProtocolError::BadFrame(
									"data frame while a fragmented message is pending",
								));
							}
							if frame.fin {
								WsStep::Input(WsInput::Message(frame.opcode, frame.payload))
							} else {
								conn.pending_opcode = Some(frame.opcode);
								conn.pending_payload = frame.payload;
								WsStep::Consumed
							}
						}
						Opcode::Continuation => {
							let Some(opcode) = conn.pending_opcode else {
								return Err(ProtocolError::BadFrame("continuation without a message"));
							};
							if conn.pending_payload.len() + frame.payload.len() > max_message {
								return Err(ProtocolError::MessageTooBig);
							}
							conn.pending_payload.extend_from_slice(&frame.payload);
							if frame.fin {
								conn.pending_opcode = None;
								let payload = std::mem::take(&mut conn.pending_payload);
								WsStep::Input(WsInput::Message(opcode, payload))
							} else {
								WsStep::Consumed
							}
						}
					}
				}
			}
		};

		let input = match step {
			WsStep::NeedMore => return Ok(false),
			WsStep::Consumed => return Ok(true),
			WsStep::Input(input) => input,
		};

		let id = self.core.clients[key].id;
		let router = Arc::clone(&self.router);

		match input {
			WsInput::Ping(payload) => {
				let conn = &mut self.core.clients[key];
				conn.enqueue_unbounded(frame::encode(Opcode::Pong, true, &payload));
			}
			WsInput::Pong => {}
			WsInput::Close(payload) => {
				let code = frame::close_code(&payload);
				debug!(client = %id, code, "peer sent close");
				self.core.begin_ws_close(key, code, "");
			}
			WsInput::Message(Opcode::Text, payload) => match serde_json::from_slice::<Envelope>(&payload) {
				Ok(envelope) => {
					dispatch::dispatch_event(&mut self.core, &router, id, envelope, false);
				}
				Err(err) => {
					warn!(client = %id, %err, "malformed message envelope");
					return Err(ProtocolError::BadFrame("malformed message envelope"));
				}
			},
			WsInput::Message(_, payload) => {
				dispatch::dispatch_binary(&mut self.core, &router, id, &payload);
			}
		}
		Ok(true)
	}

	fn write_ready(&mut self, key: usize) -> Result<(), ProtocolError> {
		let chunk_limit = self.core.config.io_chunk_bytes;
		let low_water = self.core.config.write_buffer_bytes / 2;

		let drained = {
			let conn = &mut self.core.clients[key];
			conn.flush(chunk_limit).map_err(ProtocolError::Io)?;
			if conn.read_paused && conn.outbox_bytes() < low_water {
				conn.read_paused = false;
			}
			if conn.wants_write() {
				None
			} else {
				Some(conn.state)
			}
		};

		match drained {
			Some(ConnState::HttpResponding {
				close_after: true,
			}) => {
				self.core.clients[key].state = ConnState::Closed;
			}
			Some(ConnState::HttpResponding {
				close_after: false,
			}) => {
				self.core.clients[key].state = ConnState::ReadingHttp;
				// Pipelined bytes may already be buffered.
				return self.drive(key);
			}
			Some(ConnState::WsClosing) => {
				self.core.clients[key].state = ConnState::Closed;
			}
			_ => {}
		}
		Ok(())
	}

	fn fail_connection(&mut self, key: usize, err: ProtocolError) {
		let Some(conn) = self.core.clients.get(key) else {
			return;
		};
		let id = conn.id;
		let open_ws = conn.kind == ClientKind::Ws && conn.state == ConnState::WsOpen;

		match &err {
			ProtocolError::ConnectionClosed => debug!(client = %id, "peer closed connection"),
			err => warn!(client = %id, %err, "closing connection after protocol error"),
		}

		let reason = match &err {
			ProtocolError::MessageTooBig => "message too big",
			_ => "protocol error",
		};

		if open_ws && !matches!(err, ProtocolError::ConnectionClosed | ProtocolError::Io(_)) {
			self.core.begin_ws_close(key, err.close_code(), reason);
		} else {
			self.core.clients[key].state = ConnState::Closed;
			self.core.index.remove(id);
		}
	}

	fn drive_pending_reads(&mut self) {
		let pending: Vec<usize> = self
			.core
			.clients
			.iter()
			.filter(|(_, c)| c.read_pending && !c.read_paused)
			.map(|(k, _)| k)
			.collect();
		for key in pending {
			if let Err(err) = self.read_ready(key) {
				self.fail_connection(key, err);
			}
		}
	}

	fn poll_queue(&mut self) {
		let Some(queue) = &mut self.queue else {
			return;
		};
		for record in queue.poll() {
			dispatch::dispatch_queue_record(&mut self.core, &record);
		}
	}

	fn sweep_timeouts(&mut self) {
		enum Action {
			Ping,
			CloseWs(u16, &'static str),
			Drop,
		}

		let now = Instant::now();
		let idle_timeout = self.core.config.idle_timeout;
		let ping_interval = self.core.config.ping_interval;
		let ping_timeout = self.core.config.ping_timeout;

		let keys: Vec<usize> = self.core.clients.iter().map(|(k, _)| k).collect();
		for key in keys {
			let action = {
				let Some(conn) = self.core.clients.get(key) else {
					continue;
				};
				let idle = now.duration_since(conn.last_activity);
				match conn.state {
					ConnState::WsOpen => {
						if conn.ping_sent.map(|sent| now.duration_since(sent) > ping_timeout).unwrap_or(false) {
							Some(Action::CloseWs(1001, "ping timeout"))
						} else if idle > idle_timeout {
							Some(Action::CloseWs(1000, "idle timeout"))
						} else if idle > ping_interval && conn.ping_sent.is_none() {
							Some(Action::Ping)
						} else {
							None
						}
					}
					ConnState::ReadingHttp | ConnState::Upgrading => {
						(idle > idle_timeout).then_some(Action::Drop)
					}
					ConnState::WsClosing => {
						if !conn.wants_write() {
							Some(Action::Drop)
						} else {
							(idle > idle_timeout).then_some(Action::Drop)
						}
					}
					_ => None,
				}
			};

			match action {
				Some(Action::Ping) => {
					let conn = &mut self.core.clients[key];
					conn.enqueue_unbounded(frame::encode(Opcode::Ping, true, b""));
					conn.ping_sent = Some(now);
				}
				Some(Action::CloseWs(code, reason)) => {
					debug!(client = %self.core.clients[key].id, code, reason, "closing on timeout");
					self.core.begin_ws_close(key, code, reason);
				}
				Some(Action::Drop) => {
					let id = self.core.clients[key].id;
					self.core.clients[key].state = ConnState::Closed;
					self.core.index.remove(id);
				}
				None => {}
			}
		}
	}

	/// Reconcile backpressure watermarks and poll registrations with the
	/// state mutations this tick produced.
	fn update_interests(&mut self) {
		let limit = self.core.config.write_buffer_bytes;
		let registry = self.poll.registry();

		for (_, conn) in self.core.clients.iter_mut() {
			if !conn.read_paused && conn.outbox_bytes() >= limit {
				conn.read_paused = true;
			} else if conn.read_paused && conn.outbox_bytes() < limit / 2 {
				conn.read_paused = false;
			}

			let Some(desired) = conn.desired_interest() else {
				continue;
			};
			if desired != conn.registered {
				match registry.reregister(&mut conn.stream, conn.token, desired) {
					Ok(()) => conn.registered = desired,
					Err(err) => {
						warn!(client = %conn.id, %err, "reregister failed");
						conn.state = ConnState::Closed;
					}
				}
			}
		}
	}

	fn reap_closed(&mut self) {
		let closed: Vec<usize> = self
			.core
			.clients
			.iter()
			.filter(|(_, c)| c.state == ConnState::Closed)
			.map(|(k, _)| k)
			.collect();
		for key in closed {
			let mut conn = self.core.clients.remove(key);
			let _ = self.poll.registry().deregister(&mut conn.stream);
			self.core.keys.remove(&conn.id);
			self.core.index.remove(conn.id);
			debug!(client = %conn.id, "connection closed");
		}
	}

	/// Close the listener, say goodbye to every websocket client, and
	/// drain write buffers under the configured deadline.
	fn graceful_shutdown(&mut self) {
		info!("reactor shutting down");
		let _ = self.poll.registry().deregister(&mut self.listener);

		let keys: Vec<usize> = self.core.clients.iter().map(|(k, _)| k).collect();
		for key in keys {
			match self.core.clients[key].state {
				ConnState::WsOpen => self.core.begin_ws_close(key, 1001, "server shutting down"),
				ConnState::ReadingHttp | ConnState::Upgrading => {
					let id = self.core.clients[key].id;
					self.core.clients[key].state = ConnState::Closed;
					self.core.index.remove(id);
				}
				_ => {}
			}
		}
		self.update_interests();

		let deadline = Instant::now() + self.core.config.shutdown_timeout;
		loop {
			self.reap_closed();
			let undrained = self.core.clients.iter().any(|(_, c)| c.wants_write());
			if !undrained || Instant::now() >= deadline {
				break;
			}

			if self.poll.poll(&mut self.events, Some(POLL_INTERVAL)).is_err() {
				break;
			}
			let writable: Vec<Token> =
				self.events.iter().filter(|e| e.is_writable()).map(|e| e.token()).collect();
			for token in writable {
				let Some(key) = token.0.checked_sub(TOKEN_BASE) else {
					continue;
				};
				if self.core.clients.contains(key) {
					if let Err(err) = self.write_ready(key) {
						self.fail_connection(key, err);
					}
				}
			}
			self.update_interests();
		}

		let remaining = self.core.clients.len();
		if remaining > 0 {
			debug!(remaining, "dropping undrained connections at shutdown deadline");
		}
	}
}
