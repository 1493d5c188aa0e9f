// Copyright 2024 The Cohort Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The message store: per-peer buffers of fully received messages, the
//! deadlock-detection bookkeeping and the single rendezvous slot `recv`
//! blocks on. Every field in here is only touched under the one runtime
//! mutex.

use crate::types::{is_user_tag, ANY_TAG};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A fully received inbound message waiting for a matching `recv`.
pub(crate) struct Message {
	pub tag: i64,
	pub count: i64,
	pub payload: Vec<u8>,
}

/// A user-tag send issued while deadlock detection is on, not yet
/// acknowledged by the peer's `RECEIVED` control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingSend {
	pub count: i64,
	pub tag: i64,
}

/// A wait advertised by a peer through a `WAITING` control frame, or the
/// placeholder enqueued when the peer concludes a deadlock first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PeerWait {
	pub count: i64,
	pub tag: i64,
}

/// Receive-side tag predicate: exact match, or wildcard against any
/// non-reserved tag. Reserved tags only ever match themselves.
pub(crate) fn tag_matches(requested: i64, offered: i64) -> bool {
	requested == offered || (requested == ANY_TAG && offered > ANY_TAG)
}

/// Everything the runtime tracks about one remote peer. The slot at the
/// process's own rank stays empty for the whole run.
#[derive(Default)]
pub(crate) struct PeerState {
	/// Buffered inbound messages, in arrival order.
	pub inbox: VecDeque<Message>,
	/// Outstanding user-tag sends to this peer (deadlock mode only).
	pub pending_sends: VecDeque<PendingSend>,
	/// Waits this peer has advertised against us (deadlock mode only).
	pub waits: VecDeque<PeerWait>,
	/// Set once, by the worker owning the inbound channel, when the peer's
	/// write end closes.
	pub closed: bool,
}

impl PeerState {
	/// Removes and returns the oldest buffered message satisfying the
	/// request. Matching is on exact count plus the tag predicate.
	pub fn take_matching(&mut self, count: i64, tag: i64) -> Option<Message> {
		let at = self
			.inbox
			.iter()
			.position(|m| m.count == count && tag_matches(tag, m.tag))?;
		self.inbox.remove(at)
	}

	/// Whether any outstanding send would satisfy a wait the peer has
	/// advertised for `(count, tag)`.
	pub fn has_pending_send(&self, count: i64, tag: i64) -> bool {
		self.pending_sends
			.iter()
			.any(|p| p.count == count && tag_matches(tag, p.tag))
	}

	/// Removes the outstanding send acknowledged by a `RECEIVED` frame.
	pub fn take_pending_send(&mut self, count: i64, tag: i64) -> Option<PendingSend> {
		let at = self
			.pending_sends
			.iter()
			.position(|p| p.count == count && p.tag == tag)?;
		self.pending_sends.remove(at)
	}

	/// Drops the advertised wait at the head of the queue if the given
	/// outgoing send would satisfy it.
	pub fn drop_satisfied_wait(&mut self, count: i64, tag: i64) {
		if let Some(wait) = self.waits.front() {
			if wait.count == count && tag_matches(wait.tag, tag) {
				self.waits.pop_front();
			}
		}
	}

	/// Whether the head of the advertised-wait queue is a live user wait,
	/// meaning the peer is blocked on us right now.
	pub fn peer_is_waiting(&self) -> bool {
		self.waits
			.front()
			.map(|wait| is_user_tag(wait.tag))
			.unwrap_or(false)
	}
}

/// The one rendezvous slot per process. `recv` arms it, exactly one worker
/// resolves it, `recv` resets it before returning.
pub(crate) struct WaitSlot {
	pub peer: Option<usize>,
	pub count: i64,
	pub tag: i64,
	pub delivered: bool,
	pub deadlocked: bool,
}

impl WaitSlot {
	fn idle() -> WaitSlot {
		WaitSlot {
			peer: None,
			count: 0,
			tag: 0,
			delivered: false,
			deadlocked: false,
		}
	}

	pub fn arm(&mut self, peer: usize, count: i64, tag: i64) {
		self.peer = Some(peer);
		self.count = count;
		self.tag = tag;
		self.delivered = false;
		self.deadlocked = false;
	}

	pub fn reset(&mut self) {
		*self = WaitSlot::idle();
	}

	pub fn is_waiting_on(&self, peer: usize) -> bool {
		self.peer == Some(peer)
	}

	/// Whether an arriving message resolves the armed slot.
	pub fn matches(&self, peer: usize, count: i64, tag: i64) -> bool {
		self.peer == Some(peer) && self.count == count && tag_matches(self.tag, tag)
	}
}

pub(crate) struct State {
	pub peers: Vec<PeerState>,
	pub slot: WaitSlot,
}

/// Runtime state shared between the user thread and the receiver workers:
/// one mutex, one condition variable. The wait surface is a single slot, so
/// finer-grained locking buys nothing here.
pub(crate) struct Shared {
	pub state: Mutex<State>,
	pub wakeup: Condvar,
}

impl Shared {
	pub fn new(world_size: usize) -> Shared {
		Shared {
			state: Mutex::new(State {
				peers: (0..world_size).map(|_| PeerState::default()).collect(),
				slot: WaitSlot::idle(),
			}),
			wakeup: Condvar::new(),
		}
	}
}
