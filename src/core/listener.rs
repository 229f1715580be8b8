// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Listening socket setup.

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::ServerError;

/// Build the non-blocking listener: reuse-addr, nodelay, backlog 1024.
pub(crate) fn bind_listener(host: &str, port: u16) -> Result<TcpListener, ServerError> {
	let addr = resolve(host, port)?;

	let domain = match addr {
		SocketAddr::V4(_) => Domain::IPV4,
		SocketAddr::V6(_) => Domain::IPV6,
	};

	let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(ServerError::Bind)?;
	socket.set_reuse_address(true).map_err(ServerError::Bind)?;
	socket.set_nonblocking(true).map_err(ServerError::Bind)?;
	socket.set_nodelay(true).map_err(ServerError::Bind)?;
	socket.bind(&addr.into()).map_err(ServerError::Bind)?;
	socket.listen(1024).map_err(ServerError::Bind)?;

	Ok(socket.into())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
	let mut addrs = (host, port)
		.to_socket_addrs()
		.map_err(ServerError::Bind)?;
	addrs.next().ok_or_else(|| ServerError::Configuration(format!("host '{host}' resolves to no address")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn binds_ephemeral_port() {
		let listener = bind_listener("127.0.0.1", 0).unwrap();
		let addr = listener.local_addr().unwrap();
		assert_ne!(addr.port(), 0);
	}

	#[test]
	fn unresolvable_host_is_a_bind_error() {
		assert!(bind_listener("definitely-not-a-real-host.invalid", 0).is_err());
	}
}
