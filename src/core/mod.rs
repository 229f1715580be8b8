// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

pub mod connection;
pub mod listener;
pub mod reactor;
pub mod server;
pub mod state;

pub use connection::{ClientId, ClientKind, ConnState};
pub use reactor::ShutdownHandle;
pub use server::Server;
pub use state::ServerApi;
