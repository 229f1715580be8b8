// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! File-backed broadcast queue.
//!
//! External producers append one JSON record per LF-terminated line under
//! an exclusive advisory lock. The reactor polls the file each tick with a
//! non-blocking shared lock and a byte offset; a record is consumed only
//! once its trailing LF is present, so partial writes are left for the
//! next tick. Truncation resets the offset to zero.

use std::{
	fs::{File, OpenOptions},
	io::{Read, Seek, SeekFrom, Write},
	path::PathBuf,
};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::envelope::QueueRecord;

pub(crate) struct QueueReader {
	path: PathBuf,
	offset: u64,
}

impl QueueReader {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			offset: 0,
		}
	}

	/// Read every complete record appended since the last poll. Returns
	/// an empty batch when the file is missing, locked, or unchanged.
	pub fn poll(&mut self) -> Vec<QueueRecord> {
		let mut file = match File::open(&self.path) {
			Ok(file) => file,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
			Err(err) => {
				warn!(path = %self.path.display(), %err, "cannot open queue file");
				return Vec::new();
			}
		};

		let len = match file.metadata() {
			Ok(meta) => meta.len(),
			Err(err) => {
				warn!(path = %self.path.display(), %err, "cannot stat queue file");
				return Vec::new();
			}
		};

		if len < self.offset {
			debug!(path = %self.path.display(), "queue file truncated, resetting offset");
			self.offset = 0;
		}
		if len == self.offset {
			return Vec::new();
		}

		// A writer holds the exclusive lock mid-append; try again next
		// tick.
		if file.try_lock_shared().is_err() {
			return Vec::new();
		}

		let records = self.read_new(&mut file);
		let _ = fs2::FileExt::unlock(&file);
		records
	}

	fn read_new(&mut self, file: &mut File) -> Vec<QueueRecord> {
		if file.seek(SeekFrom::Start(self.offset)).is_err() {
			return Vec::new();
		}
		let mut buf = Vec::new();
		if let Err(err) = file.read_to_end(&mut buf) {
			warn!(path = %self.path.display(), %err, "queue read failed");
			return Vec::new();
		}

		// Consume only through the last complete line.
		let Some(end) = buf.iter().rposition(|&b| b == b'\n').map(|i| i + 1) else {
			return Vec::new();
		};
		self.offset += end as u64;

		let mut records = Vec::new();
		for line in buf[..end].split(|&b| b == b'\n') {
			if line.is_empty() {
				continue;
			}
			match serde_json::from_slice::<QueueRecord>(line) {
				Ok(record) => records.push(record),
				Err(err) => {
					warn!(%err, line = %String::from_utf8_lossy(line), "skipping malformed queue record");
				}
			}
		}
		records
	}
}

/// Producer-side handle for the broadcast queue: appends records without
/// holding a server socket. Bind one to the path from configuration at
/// startup and share it freely.
#[derive(Debug, Clone)]
pub struct Publisher {
	path: PathBuf,
}

impl Publisher {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
		}
	}

	/// Append a broadcast record under an exclusive advisory lock.
	pub fn broadcast(
		&self,
		event: &str,
		data: serde_json::Value,
		namespace: &str,
		room: Option<&str>,
	) -> std::io::Result<()> {
		self.publish(&QueueRecord::broadcast(event, data, namespace, room.map(str::to_string)))
	}

	pub fn publish(&self, record: &QueueRecord) -> std::io::Result<()> {
		let mut line = serde_json::to_vec(record)?;
		line.push(b'\n');

		let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
		file.lock_exclusive()?;
		let result = (&file).write_all(&line);
		let _ = fs2::FileExt::unlock(&file);
		result
	}
}
