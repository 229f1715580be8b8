// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

pub mod frame;
pub mod handshake;
pub mod http;
