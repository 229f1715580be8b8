// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Per-client connection state.

use std::{
	collections::{HashMap, VecDeque},
	fmt,
	time::Instant,
};

use mio::{net::TcpStream, Interest, Token};
use serde_json::Value;

use crate::{
	error::SendError,
	protocol::frame::Opcode,
};

/// Opaque client identifier: monotonic, stable for the connection's
/// lifetime, never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// What protocol a connection ended up speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
	/// Accepted but no complete request seen yet.
	Unknown,
	Http,
	Ws,
}

/// Connection lifecycle:
/// `ReadingHttp -> (Upgrading | HttpResponding) -> WsOpen -> WsClosing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	ReadingHttp,
	/// Handshake middleware is running; transient within a tick.
	Upgrading,
	HttpResponding {
		close_after: bool,
	},
	WsOpen,
	WsClosing,
	Closed,
}

#[derive(Debug)]
pub(crate) struct Connection {
	pub id: ClientId,
	pub stream: TcpStream,
	pub token: Token,
	pub kind: ClientKind,
	pub state: ConnState,
	pub read_buf: Vec<u8>,
	outbox: VecDeque<Vec<u8>>,
	outbox_bytes: usize,
	/// Opcode of the in-progress fragmented message, if any.
	pub pending_opcode: Option<Opcode>,
	pub pending_payload: Vec<u8>,
	pub attrs: HashMap<String, Value>,
	pub last_activity: Instant,
	/// When a server-initiated ping went out and no pong came back yet.
	pub ping_sent: Option<Instant>,
	/// Reads are paused while the outbox is at capacity.
	pub read_paused: bool,
	/// Set when a read stopped at the fairness bound instead of
	/// would-block; the socket may still hold data and, with
	/// edge-triggered readiness, no further event will announce it.
	pub read_pending: bool,
	/// Interest currently registered with the poll, for change detection.
	pub registered: Interest,
}

impl Connection {
	pub fn new(id: ClientId, stream: TcpStream, token: Token) -> Self {
		Self {
			id,
			stream,
			token,
			kind: ClientKind::Unknown,
			state: ConnState::ReadingHttp,
			read_buf: Vec::new(),
			outbox: VecDeque::new(),
			outbox_bytes: 0,
			pending_opcode: None,
			pending_payload: Vec::new(),
			attrs: HashMap::new(),
			last_activity: Instant::now(),
			ping_sent: None,
			read_paused: false,
			read_pending: false,
			registered: Interest::READABLE,
		}
	}

	/// Write queued chunks to the socket, bounded by `limit` bytes per
	/// call. Stops at would-block.
	pub fn flush(&mut self, limit: usize) -> std::io::Result<usize> {
		use std::io::Write;

		let mut total = 0;
		while total < limit {
			let Some(front) = self.outbox.front_mut() else {
				break;
			};
			match self.stream.write(front) {
				Ok(0) => {
					return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "socket wrote zero bytes"));
				}
				Ok(n) => {
					total += n;
					self.outbox_bytes = self.outbox_bytes.saturating_sub(n);
					if n == front.len() {
						self.outbox.pop_front();
					} else {
						front.drain(..n);
						break;
					}
				}
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
				Err(err) => return Err(err),
			}
		}
		Ok(total)
	}

	/// Queue outbound bytes, bounded by `limit`.
	pub fn enqueue(&mut self, bytes: Vec<u8>, limit: usize) -> Result<(), SendError> {
		if self.outbox_bytes + bytes.len() > limit {
			return Err(SendError::Backpressured);
		}
		self.outbox_bytes += bytes.len();
		self.outbox.push_back(bytes);
		Ok(())
	}

	/// Queue control traffic (pongs, close frames, error responses) past
	/// the backpressure bound; control payloads are small and dropping
	/// them would wedge the close sequence.
	pub fn enqueue_unbounded(&mut self, bytes: Vec<u8>) {
		self.outbox_bytes += bytes.len();
		self.outbox.push_back(bytes);
	}

	pub fn outbox_bytes(&self) -> usize {
		self.outbox_bytes
	}

	pub fn wants_write(&self) -> bool {
		!self.outbox.is_empty()
	}

	pub fn front_chunk(&self) -> Option<&[u8]> {
		self.outbox.front().map(|v| v.as_slice())
	}

	pub fn touch(&mut self) {
		self.last_activity = Instant::now();
	}

	/// The poll interest this connection should be registered with, or
	/// `None` when it is done.
	pub fn desired_interest(&self) -> Option<Interest> {
		let readable = match self.state {
			ConnState::ReadingHttp | ConnState::WsOpen => !self.read_paused,
			ConnState::Upgrading => false,
			ConnState::HttpResponding {
				..
			} => false,
			ConnState::WsClosing => false,
			ConnState::Closed => return None,
		};
		let writable = self.wants_write();

		match (readable, writable) {
			(true, true) => Some(Interest::READABLE | Interest::WRITABLE),
			(true, false) => Some(Interest::READABLE),
			(false, true) => Some(Interest::WRITABLE),
			// Nothing to do right now; stay readable so peer close is
			// still observed.
			(false, false) => Some(Interest::READABLE),
		}
	}
}
