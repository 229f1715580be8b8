// Copyright (c) wavehub.dev 2025
// This file is licensed under the MIT, see license.md file

//! HTTP path patterns: literal segments and `:name` placeholders.

use std::collections::HashMap;

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Literal(String),
	Param(String),
}

#[derive(Debug, Clone)]
pub struct PathPattern {
	raw: String,
	segments: Vec<Segment>,
	literal_count: usize,
}

impl PathPattern {
	pub fn parse(pattern: &str) -> Result<Self, ServerError> {
		if !pattern.starts_with('/') {
			return Err(ServerError::Configuration(format!("route pattern must start with '/': {pattern}")));
		}

		let mut segments = Vec::new();
		let mut literal_count = 0;
		for part in pattern.split('/').filter(|s| !s.is_empty()) {
			if let Some(name) = part.strip_prefix(':') {
				if name.is_empty() {
					return Err(ServerError::Configuration(format!(
						"placeholder segment needs a name: {pattern}"
					)));
				}
				segments.push(Segment::Param(name.to_string()));
			} else {
				segments.push(Segment::Literal(part.to_string()));
				literal_count += 1;
			}
		}

		Ok(Self {
			raw: pattern.to_string(),
			segments,
			literal_count,
		})
	}

	/// Match `path`, returning captured placeholder values.
	pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
		let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
		if parts.len() != self.segments.len() {
			return None;
		}

		let mut params = HashMap::new();
		for (segment, part) in self.segments.iter().zip(&parts) {
			match segment {
				Segment::Literal(expected) => {
					if expected != part {
						return None;
					}
				}
				Segment::Param(name) => {
					params.insert(name.clone(), (*part).to_string());
				}
			}
		}
		Some(params)
	}

	/// More literal segments beat placeholders; longer patterns beat
	/// shorter ones; registration order breaks remaining ties.
	pub fn specificity(&self) -> (usize, usize) {
		(self.literal_count, self.segments.len())
	}

	pub fn raw(&self) -> &str {
		&self.raw
	}
}
