#![forbid(unsafe_code)]

use std::collections::VecDeque;

use chatrelay_domain::ChatEvent;

/// Bounded, insertion-ordered buffer of the most recent chat events.
///
/// The length never exceeds `limit`; the oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct History {
	buf: VecDeque<ChatEvent>,
	limit: usize,
}

impl History {
	pub fn new(limit: usize) -> Self {
		let limit = limit.max(1);
		Self {
			buf: VecDeque::with_capacity(limit.min(1024)),
			limit,
		}
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	/// Append an event and return how many old entries were evicted.
	pub fn push(&mut self, ev: ChatEvent) -> usize {
		self.buf.push_back(ev);
		self.trim()
	}

	/// Change the bound, trimming oldest entries if needed.
	pub fn set_limit(&mut self, limit: usize) -> usize {
		self.limit = limit.max(1);
		self.trim()
	}

	/// Copy of the buffer, oldest first.
	pub fn snapshot(&self) -> Vec<ChatEvent> {
		self.buf.iter().cloned().collect()
	}

	pub fn find(&self, id: &str) -> Option<&ChatEvent> {
		self.buf.iter().rev().find(|e| e.id == id)
	}

	fn trim(&mut self) -> usize {
		let mut evicted = 0usize;
		while self.buf.len() > self.limit {
			self.buf.pop_front();
			evicted += 1;
		}
		evicted
	}
}
