// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! HTTP/1.1 request parsing and response serialization.
//!
//! Requests are parsed incrementally from the connection buffer: headers via
//! httparse once the CRLFCRLF terminator is present, then an optional body of
//! `Content-Length` bytes. Header lookup is case-insensitive while the
//! original casing is preserved for echo.

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// A fully parsed request. Also serves as the frozen view handed to
/// handshake middleware while a connection upgrades.
#[derive(Debug, Clone)]
pub struct HttpRequest {
	pub method: String,
	/// Path component of the target, normalized to begin with `/`.
	pub path: String,
	/// Raw query string (without the `?`), empty when absent.
	pub raw_query: String,
	/// Decoded query pairs in order of appearance; keys may repeat.
	pub query: Vec<(String, String)>,
	headers: Vec<(String, String)>,
	pub body: Vec<u8>,
	/// Decoded body when `Content-Type: application/json` and the body
	/// parses; `None` keeps the raw bytes authoritative.
	pub json: Option<Value>,
}

impl HttpRequest {
	/// Case-insensitive header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn headers(&self) -> &[(String, String)] {
		&self.headers
	}

	/// First query value for `key`.
	pub fn query_get(&self, key: &str) -> Option<&str> {
		self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}

	pub fn wants_keep_alive(&self) -> bool {
		self.header("connection")
			.map(|v| v.eq_ignore_ascii_case("keep-alive"))
			.unwrap_or(false)
	}
}

/// Outcome of an incremental parse attempt.
#[derive(Debug)]
pub enum Parsed {
	/// A complete request plus the number of buffer bytes it consumed.
	Complete(HttpRequest, usize),
	/// Headers or body still incomplete; read more.
	Partial,
}

/// Parse one request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ProtocolResult<Parsed> {
	let mut headers = [httparse::EMPTY_HEADER; 64];
	let mut req = httparse::Request::new(&mut headers);

	let header_len = match req.parse(buf) {
		Ok(httparse::Status::Complete(n)) => n,
		Ok(httparse::Status::Partial) => return Ok(Parsed::Partial),
		Err(e) => return Err(ProtocolError::BadHttp(e.to_string())),
	};

	let method = req
		.method
		.ok_or_else(|| ProtocolError::BadHttp("missing method".to_string()))?
		.to_string();
	let target = req.path.ok_or_else(|| ProtocolError::BadHttp("missing target".to_string()))?;
	if req.version != Some(1) {
		return Err(ProtocolError::BadHttp("unsupported http version".to_string()));
	}

	let parsed_headers: Vec<(String, String)> = req
		.headers
		.iter()
		.map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
		.collect();

	let content_length: usize = parsed_headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
		.and_then(|(_, v)| v.trim().parse().ok())
		.unwrap_or(0);

	let total = header_len + content_length;
	if buf.len() < total {
		return Ok(Parsed::Partial);
	}
	let body = buf[header_len..total].to_vec();

	let (path, raw_query) = split_target(target);
	let query = parse_query(&raw_query);

	let is_json = parsed_headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
		.map(|(_, v)| v.to_ascii_lowercase().contains("application/json"))
		.unwrap_or(false);
	let json = if is_json && !body.is_empty() {
		serde_json::from_slice(&body).ok()
	} else {
		None
	};

	Ok(Parsed::Complete(
		HttpRequest {
			method,
			path,
			raw_query,
			query,
			headers: parsed_headers,
			body,
			json,
		},
		total,
	))
}

fn split_target(target: &str) -> (String, String) {
	let (path, query) = match target.split_once('?') {
		Some((p, q)) => (p, q.to_string()),
		None => (target, String::new()),
	};
	let path = if path.starts_with('/') {
		path.to_string()
	} else {
		format!("/{path}")
	};
	(path, query)
}

/// Parse `key=value&key=value` with URL-decoding; keys may repeat.
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
	raw.split('&')
		.filter(|pair| !pair.is_empty())
		.map(|pair| {
			let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
			(url_decode(key), url_decode(value))
		})
		.collect()
}

fn url_decode(s: &str) -> String {
	urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())
}

/// An HTTP response under construction.
#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: u16,
	reason: Option<String>,
	headers: Vec<(String, String)>,
	pub body: Vec<u8>,
	pub keep_alive: bool,
}

impl HttpResponse {
	pub fn new(status: u16) -> Self {
		Self {
			status,
			reason: None,
			headers: Vec::new(),
			body: Vec::new(),
			keep_alive: false,
		}
	}

	pub fn ok() -> Self {
		Self::new(200)
	}

	pub fn no_content() -> Self {
		Self::new(204)
	}

	pub fn not_found() -> Self {
		Self::new(404)
	}

	pub fn forbidden() -> Self {
		Self::new(403)
	}

	pub fn internal_error() -> Self {
		Self::new(500)
	}

	/// 200 response with a JSON body.
	pub fn json(value: &Value) -> Self {
		Self::ok().with_json(value)
	}

	/// 200 response with a plain-text body.
	pub fn text(body: impl Into<String>) -> Self {
		Self::ok()
			.with_header("Content-Type", "text/plain; charset=utf-8")
			.with_body(body.into().into_bytes())
	}

	pub fn with_json(mut self, value: &Value) -> Self {
		self.headers.push(("Content-Type".to_string(), "application/json".to_string()));
		self.body = value.to_string().into_bytes();
		self
	}

	pub fn with_body(mut self, body: Vec<u8>) -> Self {
		self.body = body;
		self
	}

	pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((key.into(), value.into()));
		self
	}

	pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
		self.keep_alive = keep_alive;
		self
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
		let key = key.into();
		self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
		self.headers.push((key, value.into()));
	}

	/// Serialize the full response. `Content-Length` is always present;
	/// `Connection: close` unless keep-alive was requested.
	pub fn to_bytes(&self) -> Vec<u8> {
		let reason = self.reason.as_deref().unwrap_or_else(|| reason_phrase(self.status));
		let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
		out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
		if self.header("connection").is_none() {
			let connection = if self.keep_alive {
				"keep-alive"
			} else {
				"close"
			};
			out.push_str(&format!("Connection: {connection}\r\n"));
		}
		for (key, value) in &self.headers {
			out.push_str(&format!("{key}: {value}\r\n"));
		}
		out.push_str("\r\n");

		let mut bytes = out.into_bytes();
		bytes.extend_from_slice(&self.body);
		bytes
	}
}

fn reason_phrase(status: u16) -> &'static str {
	match status {
		101 => "Switching Protocols",
		200 => "OK",
		201 => "Created",
		204 => "No Content",
		400 => "Bad Request",
		401 => "Unauthorized",
		403 => "Forbidden",
		404 => "Not Found",
		405 => "Method Not Allowed",
		500 => "Internal Server Error",
		_ => "Unknown",
	}
}
