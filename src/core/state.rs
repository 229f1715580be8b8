// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Reactor-owned server state and the facade operations over it.
//!
//! [`Core`] holds every connection, the membership index, and the
//! configuration. It is owned by the reactor thread exclusively; handlers
//! reach it through [`ServerApi`] borrows handed out by their context.

use std::collections::HashMap;

use serde_json::Value;
use slab::Slab;
use tracing::{debug, warn};

use crate::{
	config::ServerConfig,
	core::connection::{ClientId, ClientKind, ConnState, Connection},
	envelope::{Broadcast, Envelope},
	error::SendError,
	protocol::frame::{self, Opcode},
	rooms::NamespaceIndex,
};

pub(crate) struct Core {
	pub config: ServerConfig,
	pub clients: Slab<Connection>,
	/// ClientId to slab key. Slab keys are reused; ids never are.
	pub keys: HashMap<ClientId, usize>,
	pub index: NamespaceIndex,
	next_id: u64,
}

impl Core {
	pub fn new(config: ServerConfig) -> Self {
		Self {
			config,
			clients: Slab::new(),
			keys: HashMap::new(),
			index: NamespaceIndex::new(),
			next_id: 0,
		}
	}

	pub fn alloc_id(&mut self) -> ClientId {
		let id = ClientId(self.next_id);
		self.next_id += 1;
		id
	}

	pub fn key_of(&self, id: ClientId) -> Option<usize> {
		self.keys.get(&id).copied()
	}

	pub fn conn(&self, id: ClientId) -> Option<&Connection> {
		self.key_of(id).and_then(|k| self.clients.get(k))
	}

	pub fn conn_mut(&mut self, id: ClientId) -> Option<&mut Connection> {
		let key = self.key_of(id)?;
		self.clients.get_mut(key)
	}

	/// Send an envelope to one client as a text frame.
	pub fn send_envelope(&mut self, id: ClientId, envelope: &Envelope) -> Result<(), SendError> {
		let text = serde_json::to_string(envelope).expect("envelope serialization is infallible");
		let bytes = frame::encode(Opcode::Text, true, text.as_bytes());
		self.send_prebuilt(id, bytes)
	}

	/// Send prebuilt frame bytes to one open websocket client.
	pub fn send_prebuilt(&mut self, id: ClientId, bytes: Vec<u8>) -> Result<(), SendError> {
		let limit = self.config.write_buffer_bytes;
		let conn = self.conn_mut(id).ok_or(SendError::UnknownClient(id))?;
		if conn.kind != ClientKind::Ws || conn.state != ConnState::WsOpen {
			return Err(SendError::NotWebSocket(id));
		}
		conn.enqueue(bytes, limit)
	}

	/// Fan a single envelope out to a namespace or one room inside it.
	///
	/// The frame is encoded once; every recipient gets the same prebuilt
	/// bytes. The target set is snapshotted before delivery, so joins and
	/// leaves triggered by invoked handlers cannot skew it. Returns the
	/// number of clients the message was queued for.
	pub fn broadcast(&mut self, event: &str, data: &Value, ns: Option<&str>, room: Option<&str>) -> usize {
		let ns = ns.unwrap_or("/");
		let envelope = Envelope::new(event, data.clone());
		let text = serde_json::to_string(&envelope).expect("envelope serialization is infallible");
		let bytes = frame::encode(Opcode::Text, true, text.as_bytes());

		let targets = match room {
			Some(room) => self.index.room_members(ns, room),
			None => self.index.members(ns),
		};

		let mut delivered = 0;
		for id in targets {
			match self.send_prebuilt(id, bytes.clone()) {
				Ok(()) => delivered += 1,
				Err(SendError::Backpressured) => {
					warn!(client = %id, event, "broadcast dropped: client backpressured");
				}
				Err(_) => {
					// Target left between snapshot and delivery.
					debug!(client = %id, event, "broadcast skipped gone client");
				}
			}
		}
		delivered
	}

	/// Deliver a broadcast description value.
	pub fn broadcast_value(&mut self, broadcast: &Broadcast) -> usize {
		if broadcast.rooms.is_empty() {
			return self.broadcast(&broadcast.event, &broadcast.data, Some(&broadcast.namespace), None);
		}
		let mut delivered = 0;
		for room in &broadcast.rooms {
			delivered += self.broadcast(&broadcast.event, &broadcast.data, Some(&broadcast.namespace), Some(room));
		}
		delivered
	}

	pub fn join_namespace(&mut self, id: ClientId, ns: &str) -> Result<(), SendError> {
		self.require_ws(id)?;
		self.index.join_namespace(id, ns);
		Ok(())
	}

	pub fn join_room(&mut self, id: ClientId, room: &str, ns: &str) -> Result<(), SendError> {
		self.require_ws(id)?;
		self.index.join_room(id, room, ns);
		Ok(())
	}

	pub fn leave_room(&mut self, id: ClientId, room: &str) -> Result<(), SendError> {
		self.require_ws(id)?;
		self.index.leave_room(id, room);
		Ok(())
	}

	/// Begin closing a client. Idempotent while the close drains; a fully
	/// gone id yields `UnknownClient`.
	pub fn disconnect(&mut self, id: ClientId) -> Result<(), SendError> {
		let Some(key) = self.key_of(id) else {
			return Err(SendError::UnknownClient(id));
		};
		match self.clients[key].state {
			ConnState::WsOpen => {
				self.begin_ws_close(key, 1000, "server disconnect");
			}
			ConnState::WsClosing | ConnState::Closed => {}
			_ => {
				self.clients[key].state = ConnState::Closed;
				self.index.remove(id);
			}
		}
		Ok(())
	}

	/// Queue a close frame, stop dispatching for the client, and drop it
	/// from the membership index. The connection lingers until its outbox
	/// drains.
	pub fn begin_ws_close(&mut self, key: usize, code: u16, reason: &str) {
		let Some(conn) = self.clients.get_mut(key) else {
			return;
		};
		if conn.state == ConnState::WsClosing || conn.state == ConnState::Closed {
			return;
		}
		let id = conn.id;
		conn.enqueue_unbounded(frame::encode_close(code, reason));
		conn.state = ConnState::WsClosing;
		self.index.remove(id);
	}

	pub fn set_client_data(&mut self, id: ClientId, key: &str, value: Value) -> Result<(), SendError> {
		let conn = self.conn_mut(id).ok_or(SendError::UnknownClient(id))?;
		conn.attrs.insert(key.to_string(), value);
		Ok(())
	}

	pub fn client_data(&self, id: ClientId, key: &str) -> Option<Value> {
		self.conn(id).and_then(|c| c.attrs.get(key).cloned())
	}

	pub fn clients_in_namespace(&self, ns: &str) -> Vec<ClientId> {
		self.index.members(ns)
	}

	pub fn clients_in_room(&self, room: &str, ns: &str) -> Vec<ClientId> {
		self.index.room_members(ns, room)
	}

	pub fn client_rooms(&self, id: ClientId) -> Vec<String> {
		self.index.client_rooms(id)
	}

	pub fn namespace_of(&self, id: ClientId) -> Option<String> {
		self.index.namespace_of(id).map(str::to_string)
	}

	pub fn is_connected(&self, id: ClientId) -> bool {
		self.conn(id).map(|c| c.state != ConnState::Closed).unwrap_or(false)
	}

	pub fn client_kind(&self, id: ClientId) -> Option<ClientKind> {
		self.conn(id).map(|c| c.kind)
	}

	pub fn client_count(&self) -> usize {
		self.clients.iter().filter(|(_, c)| c.state != ConnState::Closed).count()
	}

	fn require_ws(&self, id: ClientId) -> Result<(), SendError> {
		let conn = self.conn(id).ok_or(SendError::UnknownClient(id))?;
		if conn.kind != ClientKind::Ws || conn.state != ConnState::WsOpen {
			return Err(SendError::NotWebSocket(id));
		}
		Ok(())
	}
}

/// Facade over the reactor-owned state, exposed to handlers through their
/// context. Safe to use from inside any handler; never send it to another
/// thread (the borrow makes that impossible).
pub struct ServerApi<'a> {
	core: &'a mut Core,
}

impl<'a> ServerApi<'a> {
	pub(crate) fn new(core: &'a mut Core) -> Self {
		Self {
			core,
		}
	}

	pub fn send(&mut self, id: ClientId, event: &str, data: Value) -> Result<(), SendError> {
		self.core.send_envelope(id, &Envelope::new(event, data))
	}

	/// Broadcast to a namespace (default `/`), optionally narrowed to one
	/// room. Returns how many clients were reached.
	pub fn broadcast(&mut self, event: &str, data: &Value, ns: Option<&str>, room: Option<&str>) -> usize {
		self.core.broadcast(event, data, ns, room)
	}

	pub fn broadcast_value(&mut self, broadcast: &Broadcast) -> usize {
		self.core.broadcast_value(broadcast)
	}

	pub fn join_namespace(&mut self, id: ClientId, ns: &str) -> Result<(), SendError> {
		self.core.join_namespace(id, ns)
	}

	pub fn join_room(&mut self, id: ClientId, room: &str, ns: &str) -> Result<(), SendError> {
		self.core.join_room(id, room, ns)
	}

	pub fn leave_room(&mut self, id: ClientId, room: &str) -> Result<(), SendError> {
		self.core.leave_room(id, room)
	}

	pub fn disconnect(&mut self, id: ClientId) -> Result<(), SendError> {
		self.core.disconnect(id)
	}

	pub fn set_client_data(&mut self, id: ClientId, key: &str, value: Value) -> Result<(), SendError> {
		self.core.set_client_data(id, key, value)
	}

	pub fn client_data(&self, id: ClientId, key: &str) -> Option<Value> {
		self.core.client_data(id, key)
	}

	pub fn clients_in_namespace(&self, ns: &str) -> Vec<ClientId> {
		self.core.clients_in_namespace(ns)
	}

	pub fn clients_in_room(&self, room: &str, ns: &str) -> Vec<ClientId> {
		self.core.clients_in_room(room, ns)
	}

	pub fn client_rooms(&self, id: ClientId) -> Vec<String> {
		self.core.client_rooms(id)
	}

	pub fn namespace_of(&self, id: ClientId) -> Option<String> {
		self.core.namespace_of(id)
	}

	pub fn is_connected(&self, id: ClientId) -> bool {
		self.core.is_connected(id)
	}

	pub fn client_kind(&self, id: ClientId) -> Option<ClientKind> {
		self.core.client_kind(id)
	}

	pub fn client_count(&self) -> usize {
		self.core.client_count()
	}
}

#[cfg(test)]
mod tests {
	use mio::Token;
	use serde_json::json;

	use super::*;
	use crate::protocol::frame::{decode, Opcode};

	/// Insert a websocket-open connection backed by a real socket pair.
	fn ws_client(core: &mut Core) -> (ClientId, std::net::TcpStream) {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
		let (accepted, _) = listener.accept().unwrap();
		accepted.set_nonblocking(true).unwrap();

		let id = core.alloc_id();
		let entry = core.clients.vacant_entry();
		let key = entry.key();
		let mut conn = Connection::new(id, mio::net::TcpStream::from_std(accepted), Token(2 + key));
		conn.kind = ClientKind::Ws;
		conn.state = ConnState::WsOpen;
		entry.insert(conn);
		core.keys.insert(id, key);
		core.index.join_namespace(id, "/");
		(id, peer)
	}

	fn queued_envelope(core: &Core, id: ClientId) -> Option<Envelope> {
		let conn = core.conn(id)?;
		let bytes = conn.front_chunk()?;
		let (frame, _) = decode(bytes, 2 << 20, false).unwrap()?;
		assert_eq!(frame.opcode, Opcode::Text);
		Some(serde_json::from_slice(&frame.payload).unwrap())
	}

	#[test]
	fn send_queues_a_text_frame() {
		let mut core = Core::new(ServerConfig::default());
		let (id, _peer) = ws_client(&mut core);

		core.send_envelope(id, &Envelope::new("pong", json!({"n": 1}))).unwrap();

		let envelope = queued_envelope(&core, id).unwrap();
		assert_eq!(envelope.event, "pong");
		assert_eq!(envelope.data, json!({"n": 1}));
	}

	#[test]
	fn send_to_unknown_client_fails() {
		let mut core = Core::new(ServerConfig::default());
		let bogus = ClientId(999);
		assert_eq!(core.send_envelope(bogus, &Envelope::new("x", json!(null))), Err(SendError::UnknownClient(bogus)));
	}

	#[test]
	fn send_past_write_buffer_is_backpressured_not_fatal() {
		let config = ServerConfig::new().write_buffer_bytes(64);
		let mut core = Core::new(config);
		let (id, _peer) = ws_client(&mut core);

		let big = "x".repeat(128);
		let result = core.send_envelope(id, &Envelope::new("big", json!(big)));
		assert_eq!(result, Err(SendError::Backpressured));
		assert!(core.is_connected(id));
	}

	#[test]
	fn broadcast_reaches_room_members_only() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let (b, _pb) = ws_client(&mut core);
		let (c, _pc) = ws_client(&mut core);

		core.join_room(a, "r1", "/chat").unwrap();
		core.join_room(b, "r1", "/chat").unwrap();
		core.join_namespace(c, "/chat").unwrap();

		let delivered = core.broadcast("chat.msg", &json!({"text": "hi"}), Some("/chat"), Some("r1"));
		assert_eq!(delivered, 2);
		assert!(queued_envelope(&core, a).is_some());
		assert!(queued_envelope(&core, b).is_some());
		assert!(queued_envelope(&core, c).is_none());
	}

	#[test]
	fn broadcast_without_room_covers_the_namespace() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let (b, _pb) = ws_client(&mut core);
		core.join_room(b, "r1", "/").unwrap();

		let delivered = core.broadcast("tick", &json!({"n": 1}), None, None);
		assert_eq!(delivered, 2);
		let _ = a;
	}

	#[test]
	fn broadcast_value_with_rooms() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let (b, _pb) = ws_client(&mut core);
		core.join_room(a, "r1", "/").unwrap();
		core.join_room(b, "r2", "/").unwrap();

		let spec = Broadcast::new("update").room("r1").room("r2").data(json!(1));
		assert_eq!(core.broadcast_value(&spec), 2);
	}

	#[test]
	fn disconnect_is_idempotent_while_draining() {
		let mut core = Core::new(ServerConfig::default());
		let (id, _peer) = ws_client(&mut core);
		core.join_room(id, "r1", "/").unwrap();

		assert!(core.disconnect(id).is_ok());
		assert!(core.client_rooms(id).is_empty());
		assert!(core.clients_in_room("r1", "/").is_empty());
		// still draining its close frame; a second call is a no-op
		assert!(core.disconnect(id).is_ok());

		// after the reactor reaps it, the id is gone
		let key = core.key_of(id).unwrap();
		core.clients.remove(key);
		core.keys.remove(&id);
		assert_eq!(core.disconnect(id), Err(SendError::UnknownClient(id)));
	}

	#[test]
	fn disconnected_client_receives_no_broadcasts() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let (b, _pb) = ws_client(&mut core);

		core.disconnect(a).unwrap();
		let delivered = core.broadcast("tick", &json!(null), None, None);
		assert_eq!(delivered, 1);
		let _ = b;
	}

	#[test]
	fn facade_ops_require_a_websocket_client() {
		let mut core = Core::new(ServerConfig::default());
		let (id, _peer) = ws_client(&mut core);
		core.conn_mut(id).unwrap().kind = ClientKind::Http;
		core.conn_mut(id).unwrap().state = ConnState::ReadingHttp;

		assert_eq!(core.join_room(id, "r", "/"), Err(SendError::NotWebSocket(id)));
		assert_eq!(core.send_envelope(id, &Envelope::new("x", json!(null))), Err(SendError::NotWebSocket(id)));
	}

	#[test]
	fn attribute_bag_roundtrip() {
		let mut core = Core::new(ServerConfig::default());
		let (id, _peer) = ws_client(&mut core);

		core.set_client_data(id, "auth.userId", json!("u-7")).unwrap();
		assert_eq!(core.client_data(id, "auth.userId"), Some(json!("u-7")));
		assert_eq!(core.client_data(id, "missing"), None);
	}

	#[test]
	fn client_queries() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let (b, _pb) = ws_client(&mut core);
		core.join_room(b, "r1", "/game").unwrap();

		assert_eq!(core.client_count(), 2);
		assert_eq!(core.client_kind(a), Some(ClientKind::Ws));
		assert_eq!(core.namespace_of(b).as_deref(), Some("/game"));
		assert_eq!(core.clients_in_namespace("/"), vec![a]);
		assert_eq!(core.clients_in_room("r1", "/game"), vec![b]);
	}

	#[test]
	fn client_ids_are_never_reused() {
		let mut core = Core::new(ServerConfig::default());
		let (a, _pa) = ws_client(&mut core);
		let key = core.key_of(a).unwrap();
		core.clients.remove(key);
		core.keys.remove(&a);

		let (b, _pb) = ws_client(&mut core);
		assert_ne!(a, b);
		// the slab key was recycled, the id was not
		assert_eq!(core.key_of(b), Some(key));
	}
}
