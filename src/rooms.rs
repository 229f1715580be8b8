// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! Client / namespace / room membership index.
//!
//! Forward maps (`namespace -> members`, `namespace -> room -> members`)
//! and a reverse map (`client -> (namespace, rooms)`) are kept in lockstep;
//! the index is the single source of truth for membership. Member listings
//! return snapshots so fan-out survives joins and leaves triggered by the
//! handlers it invokes.

use std::collections::{HashMap, HashSet};

use crate::core::connection::ClientId;

#[derive(Debug, Default)]
struct NamespaceEntry {
	members: HashSet<ClientId>,
	rooms: HashMap<String, HashSet<ClientId>>,
}

#[derive(Debug)]
struct ClientEntry {
	namespace: String,
	rooms: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct NamespaceIndex {
	namespaces: HashMap<String, NamespaceEntry>,
	clients: HashMap<ClientId, ClientEntry>,
}

impl NamespaceIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Put `id` into `ns`, leaving its previous namespace and all rooms
	/// held there. Joining the current namespace again is a no-op.
	pub fn join_namespace(&mut self, id: ClientId, ns: &str) {
		if let Some(entry) = self.clients.get(&id) {
			if entry.namespace == ns {
				return;
			}
			self.remove(id);
		}

		self.namespaces.entry(ns.to_string()).or_default().members.insert(id);
		self.clients.insert(
			id,
			ClientEntry {
				namespace: ns.to_string(),
				rooms: HashSet::new(),
			},
		);
	}

	/// Put `id` into `room` within `ns`, switching namespaces first if
	/// needed.
	pub fn join_room(&mut self, id: ClientId, room: &str, ns: &str) {
		match self.clients.get(&id) {
			Some(entry) if entry.namespace == ns => {}
			_ => self.join_namespace(id, ns),
		}

		let entry = self.namespaces.entry(ns.to_string()).or_default();
		entry.rooms.entry(room.to_string()).or_default().insert(id);
		if let Some(client) = self.clients.get_mut(&id) {
			client.rooms.insert(room.to_string());
		}
	}

	pub fn leave_room(&mut self, id: ClientId, room: &str) {
		let Some(client) = self.clients.get_mut(&id) else {
			return;
		};
		if !client.rooms.remove(room) {
			return;
		}
		let ns = client.namespace.clone();
		self.prune_room(&ns, room, id);
	}

	pub fn leave_all_rooms(&mut self, id: ClientId) {
		let Some(client) = self.clients.get_mut(&id) else {
			return;
		};
		let ns = client.namespace.clone();
		let rooms: Vec<String> = client.rooms.drain().collect();
		for room in rooms {
			self.prune_room(&ns, &room, id);
		}
	}

	/// Remove `id` entirely. Called on disconnect; unknown ids are a
	/// no-op.
	pub fn remove(&mut self, id: ClientId) {
		let Some(client) = self.clients.remove(&id) else {
			return;
		};
		if let Some(entry) = self.namespaces.get_mut(&client.namespace) {
			entry.members.remove(&id);
			for room in &client.rooms {
				if let Some(members) = entry.rooms.get_mut(room) {
					members.remove(&id);
					if members.is_empty() {
						entry.rooms.remove(room);
					}
				}
			}
			if entry.members.is_empty() && entry.rooms.is_empty() {
				self.namespaces.remove(&client.namespace);
			}
		}
	}

	pub fn contains(&self, id: ClientId) -> bool {
		self.clients.contains_key(&id)
	}

	pub fn namespace_of(&self, id: ClientId) -> Option<&str> {
		self.clients.get(&id).map(|c| c.namespace.as_str())
	}

	/// Rooms `id` currently holds; empty for unknown clients.
	pub fn client_rooms(&self, id: ClientId) -> Vec<String> {
		self.clients
			.get(&id)
			.map(|c| c.rooms.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Snapshot of every client in `ns`.
	pub fn members(&self, ns: &str) -> Vec<ClientId> {
		self.namespaces
			.get(ns)
			.map(|e| e.members.iter().copied().collect())
			.unwrap_or_default()
	}

	/// Snapshot of every client in `room` within `ns`.
	pub fn room_members(&self, ns: &str, room: &str) -> Vec<ClientId> {
		self.namespaces
			.get(ns)
			.and_then(|e| e.rooms.get(room))
			.map(|members| members.iter().copied().collect())
			.unwrap_or_default()
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}

	fn prune_room(&mut self, ns: &str, room: &str, id: ClientId) {
		if let Some(entry) = self.namespaces.get_mut(ns) {
			if let Some(members) = entry.rooms.get_mut(room) {
				members.remove(&id);
				if members.is_empty() {
					entry.rooms.remove(room);
				}
			}
		}
	}
}
