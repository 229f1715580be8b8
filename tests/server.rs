// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! End-to-end tests driving a live server over real sockets.

use std::{
	io::{Read, Write},
	net::{SocketAddr, TcpStream},
	thread,
	time::Duration,
};

use serde_json::{json, Value};
use wavehub::{
	protocol::frame::{self, Opcode},
	Envelope, EventContext, HandlerError, HandlerResult, HttpContext, HttpRequest, HttpResponse, HttpResult,
	Publisher, QueueConfig, Server, ServerConfig, ShutdownHandle,
};

fn ping(_ctx: &mut EventContext<'_>) -> HandlerResult {
	Ok(Some(Envelope::new("pong", json!({}))))
}

fn join_room(ctx: &mut EventContext<'_>) -> HandlerResult {
	let room = ctx.data.get("room").and_then(Value::as_str).unwrap_or("lobby").to_string();
	let ns = ctx.data.get("namespace").and_then(Value::as_str).unwrap_or("/").to_string();
	let id = ctx.client_id;
	ctx.server().join_room(id, &room, &ns).map_err(|e| HandlerError::new(e.to_string()))?;
	Ok(Some(Envelope::new("joined", json!({"room": room}))))
}

fn chat_send(ctx: &mut EventContext<'_>) -> HandlerResult {
	let room = ctx.data.get("room").and_then(Value::as_str).map(str::to_string);
	let text = ctx.data.get("text").cloned().unwrap_or(Value::Null);
	let ns = ctx.namespace.clone();
	ctx.server().broadcast("chat.msg", &json!({"text": text}), Some(&ns), room.as_deref());
	Ok(None)
}

fn health(_req: &HttpRequest, _ctx: &mut HttpContext<'_>) -> HttpResult {
	Ok(HttpResponse::json(&json!({"ok": true})))
}

fn base_server(config: ServerConfig) -> Server {
	let mut server = Server::new(config);
	server.router_mut().on("ping", ping);
	server.router_mut().on("join", join_room);
	server.router_mut().on("chat.send", chat_send);
	server.router_mut().route("GET", "/health", health).unwrap();
	server
}

fn spawn(mut server: Server) -> (SocketAddr, ShutdownHandle, thread::JoinHandle<()>) {
	let addr = server.bind().expect("bind");
	let handle = server.shutdown_handle().expect("handle");
	let join = thread::spawn(move || server.run().expect("run"));
	(addr, handle, join)
}

struct WsClient {
	stream: TcpStream,
	buf: Vec<u8>,
}

impl WsClient {
	fn connect(addr: SocketAddr, path: &str) -> Self {
		let mut stream = TcpStream::connect(addr).expect("connect");
		stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
		stream.set_nodelay(true).unwrap();

		let request = format!(
			"GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
		);
		stream.write_all(request.as_bytes()).unwrap();

		let mut head = Vec::new();
		let mut byte = [0u8; 1];
		while !head.ends_with(b"\r\n\r\n") {
			stream.read_exact(&mut byte).expect("handshake response");
			head.push(byte[0]);
		}
		let head = String::from_utf8_lossy(&head);
		assert!(head.starts_with("HTTP/1.1 101 Switching Protocols"), "unexpected handshake: {head}");
		assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), "bad accept key: {head}");

		Self {
			stream,
			buf: Vec::new(),
		}
	}

	fn send_event(&mut self, event: &str, data: Value) {
		let text = serde_json::to_string(&json!({"event": event, "data": data})).unwrap();
		let bytes = frame::encode_masked(Opcode::Text, true, text.as_bytes(), [0x13, 0x37, 0x42, 0x99]);
		self.stream.write_all(&bytes).unwrap();
	}

	fn send_raw(&mut self, bytes: &[u8]) {
		self.stream.write_all(bytes).unwrap();
	}

	fn recv_frame(&mut self) -> (Opcode, Vec<u8>) {
		loop {
			if let Some((frame, consumed)) = frame::decode(&self.buf, 1 << 20, false).expect("valid frame") {
				self.buf.drain(..consumed);
				return (frame.opcode, frame.payload);
			}
			let mut chunk = [0u8; 4096];
			let n = self.stream.read(&mut chunk).expect("read frame");
			assert!(n > 0, "server closed the connection");
			self.buf.extend_from_slice(&chunk[..n]);
		}
	}

	fn recv_envelope(&mut self) -> Envelope {
		let (opcode, payload) = self.recv_frame();
		assert_eq!(opcode, Opcode::Text, "expected a text frame");
		serde_json::from_slice(&payload).expect("valid envelope")
	}

	fn expect_eof(&mut self) {
		let mut chunk = [0u8; 64];
		loop {
			match self.stream.read(&mut chunk) {
				Ok(0) => return,
				Ok(_) => continue,
				Err(err) => panic!("expected eof, got {err}"),
			}
		}
	}
}

#[test]
fn ping_pong_roundtrip() {
	let (addr, handle, join) = spawn(base_server(ServerConfig::new().port(0)));

	let mut client = WsClient::connect(addr, "/");
	client.send_event("ping", json!({}));
	let reply = client.recv_envelope();
	assert_eq!(reply.event, "pong");
	assert_eq!(reply.data, json!({}));

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn room_broadcast_reaches_both_members() {
	let (addr, handle, join) = spawn(base_server(ServerConfig::new().port(0)));

	let mut a = WsClient::connect(addr, "/");
	let mut b = WsClient::connect(addr, "/");

	a.send_event("join", json!({"room": "r1", "namespace": "/chat"}));
	assert_eq!(a.recv_envelope().event, "joined");
	b.send_event("join", json!({"room": "r1", "namespace": "/chat"}));
	assert_eq!(b.recv_envelope().event, "joined");

	a.send_event("chat.send", json!({"room": "r1", "text": "hi"}));

	let got_b = b.recv_envelope();
	assert_eq!(got_b.event, "chat.msg");
	assert_eq!(got_b.data, json!({"text": "hi"}));

	// the sender is included in the fan-out
	let got_a = a.recv_envelope();
	assert_eq!(got_a.event, "chat.msg");
	assert_eq!(got_a.data, json!({"text": "hi"}));

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn queue_file_injects_broadcasts() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("queue.jsonl");
	let config = ServerConfig::new().port(0).queue(QueueConfig::default().file(&path));
	let (addr, handle, join) = spawn(base_server(config));

	let mut client = WsClient::connect(addr, "/");
	// one round-trip so the subscription is fully established
	client.send_event("ping", json!({}));
	assert_eq!(client.recv_envelope().event, "pong");

	let publisher = Publisher::new(&path);
	publisher.broadcast("tick", json!({"n": 1}), "/", None).unwrap();

	let envelope = client.recv_envelope();
	assert_eq!(envelope.event, "tick");
	assert_eq!(envelope.data, json!({"n": 1}));

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn http_health_endpoint() {
	let (addr, handle, join) = spawn(base_server(ServerConfig::new().port(0)));

	let mut stream = TcpStream::connect(addr).unwrap();
	stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
	stream.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

	let mut response = String::new();
	stream.read_to_string(&mut response).unwrap();

	assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected response: {response}");
	assert!(response.contains("Content-Type: application/json\r\n"));
	assert!(response.contains("Connection: close\r\n"));
	assert!(response.ends_with("{\"ok\":true}"));

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn options_preflight_with_allowed_origin() {
	let mut config = ServerConfig::new().port(0);
	config.cors = wavehub::CorsConfig::default().allow_origins(["https://app.example"]);
	let (addr, handle, join) = spawn(base_server(config));

	let mut stream = TcpStream::connect(addr).unwrap();
	stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
	stream
		.write_all(b"OPTIONS /health HTTP/1.1\r\nHost: localhost\r\nOrigin: https://app.example\r\n\r\n")
		.unwrap();

	let mut response = String::new();
	stream.read_to_string(&mut response).unwrap();

	assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"), "unexpected response: {response}");
	assert!(response.contains("Access-Control-Allow-Origin: https://app.example\r\n"));
	assert!(response.contains("Access-Control-Allow-Methods: "));
	assert!(response.contains("Access-Control-Allow-Headers: "));
	assert!(response.contains("Access-Control-Max-Age: 86400\r\n"));

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn reserved_bits_close_the_offender_only() {
	let (addr, handle, join) = spawn(base_server(ServerConfig::new().port(0)));

	let mut innocent = WsClient::connect(addr, "/");
	let mut offender = WsClient::connect(addr, "/");

	let mut bad = frame::encode_masked(Opcode::Text, true, b"{}", [1, 2, 3, 4]);
	bad[0] |= 0x40;
	offender.send_raw(&bad);

	let (opcode, payload) = offender.recv_frame();
	assert_eq!(opcode, Opcode::Close);
	assert_eq!(frame::close_code(&payload), 1002);
	offender.expect_eof();

	// the other connection is unaffected
	innocent.send_event("ping", json!({}));
	assert_eq!(innocent.recv_envelope().event, "pong");

	handle.shutdown();
	join.join().unwrap();
}

#[test]
fn shutdown_says_goodbye_with_1001() {
	let (addr, handle, join) = spawn(base_server(ServerConfig::new().port(0)));

	let mut client = WsClient::connect(addr, "/");
	client.send_event("ping", json!({}));
	assert_eq!(client.recv_envelope().event, "pong");

	handle.shutdown();
	join.join().unwrap();

	let (opcode, payload) = client.recv_frame();
	assert_eq!(opcode, Opcode::Close);
	assert_eq!(frame::close_code(&payload), 1001);
	client.expect_eof();
}

#[test]
fn oversized_message_closes_with_1009() {
	let config = ServerConfig::new().port(0).max_frame_bytes(1024).max_message_bytes(1024);
	let (addr, handle, join) = spawn(base_server(config));

	let mut client = WsClient::connect(addr, "/");
	let huge = vec![b'a'; 4096];
	let bytes = frame::encode_masked(Opcode::Binary, true, &huge, [9, 9, 9, 9]);
	client.send_raw(&bytes);

	let (opcode, payload) = client.recv_frame();
	assert_eq!(opcode, Opcode::Close);
	assert_eq!(frame::close_code(&payload), 1009);
	client.expect_eof();

	handle.shutdown();
	join.join().unwrap();
}
