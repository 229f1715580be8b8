// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! WebSocket upgrade handshake (RFC 6455 §4).

use base64::{prelude::BASE64_STANDARD, Engine};
use sha1::{digest::Digest, Sha1};

use crate::{
	error::{ProtocolError, ProtocolResult},
	protocol::http::{HttpRequest, HttpResponse},
};

const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Whether the request headers declare a websocket upgrade. A request that
/// passes this check but fails [`validate_upgrade`] is a handshake error,
/// not a plain HTTP request.
pub fn is_upgrade_request(req: &HttpRequest) -> bool {
	let upgrade = req.header("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
	let connection = req
		.header("connection")
		.map(|v| v.to_ascii_lowercase().contains("upgrade"))
		.unwrap_or(false);
	upgrade && connection
}

/// Validate the upgrade request and compute the accept key.
///
/// Requires `GET`, `Sec-WebSocket-Version: 13`, and a `Sec-WebSocket-Key`
/// that base64-decodes to exactly 16 bytes.
pub fn validate_upgrade(req: &HttpRequest) -> ProtocolResult<String> {
	if req.method != "GET" {
		return Err(ProtocolError::BadHandshake("upgrade requires GET".to_string()));
	}

	match req.header("sec-websocket-version") {
		Some("13") => {}
		Some(other) => {
			return Err(ProtocolError::BadHandshake(format!("unsupported websocket version {other}")));
		}
		None => {
			return Err(ProtocolError::BadHandshake("missing Sec-WebSocket-Version".to_string()));
		}
	}

	let key = req
		.header("sec-websocket-key")
		.ok_or_else(|| ProtocolError::BadHandshake("missing Sec-WebSocket-Key".to_string()))?;
	let decoded = BASE64_STANDARD
		.decode(key.trim())
		.map_err(|_| ProtocolError::BadHandshake("Sec-WebSocket-Key is not base64".to_string()))?;
	if decoded.len() != 16 {
		return Err(ProtocolError::BadHandshake("Sec-WebSocket-Key must decode to 16 bytes".to_string()));
	}

	Ok(accept_key(key.trim()))
}

/// `base64(sha1(key + magic GUID))`.
pub fn accept_key(key: &str) -> String {
	let mut sha1 = Sha1::new();
	sha1.update(key.as_bytes());
	sha1.update(MAGIC_GUID.as_bytes());
	BASE64_STANDARD.encode(sha1.finalize())
}

/// The `101 Switching Protocols` response completing the handshake.
pub fn switching_protocols(accept: &str) -> HttpResponse {
	HttpResponse::new(101)
		.with_header("Upgrade", "websocket")
		.with_header("Connection", "Upgrade")
		.with_header("Sec-WebSocket-Accept", accept)
		.with_keep_alive(true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::http::{parse_request, Parsed};

	fn upgrade_request(extra: &str) -> HttpRequest {
		let raw = format!(
			"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n{extra}\r\n"
		);
		match parse_request(raw.as_bytes()).unwrap() {
			Parsed::Complete(req, _) => req,
			Parsed::Partial => panic!("incomplete request"),
		}
	}

	#[test]
	fn canonical_accept_key() {
		// The worked example from RFC 6455 §1.3.
		assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
	}

	#[test]
	fn valid_upgrade_is_accepted() {
		let req = upgrade_request("");
		assert!(is_upgrade_request(&req));
		assert_eq!(validate_upgrade(&req).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
	}

	#[test]
	fn plain_get_is_not_an_upgrade() {
		let raw = b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n";
		let Parsed::Complete(req, _) = parse_request(raw).unwrap() else {
			panic!("incomplete request");
		};
		assert!(!is_upgrade_request(&req));
	}

	#[test]
	fn wrong_version_is_rejected() {
		let raw = "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n";
		let Parsed::Complete(req, _) = parse_request(raw.as_bytes()).unwrap() else {
			panic!("incomplete request");
		};
		assert!(validate_upgrade(&req).is_err());
	}

	#[test]
	fn short_key_is_rejected() {
		let raw = "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: c2hvcnQ=\r\nSec-WebSocket-Version: 13\r\n\r\n";
		let Parsed::Complete(req, _) = parse_request(raw.as_bytes()).unwrap() else {
			panic!("incomplete request");
		};
		assert!(validate_upgrade(&req).is_err());
	}

	#[test]
	fn switching_protocols_response() {
		let text = String::from_utf8(switching_protocols("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=").to_bytes()).unwrap();
		assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
		assert!(text.contains("Upgrade: websocket\r\n"));
		assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
	}
}
