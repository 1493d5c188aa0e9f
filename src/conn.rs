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

//! Receiver workers. One background thread per remote peer owns that peer's
//! inbound channel, blocks on it without holding the runtime lock, and takes
//! the lock only to classify each completed frame into the message store or
//! the deadlock state machine.

use crate::msg::{self, Header};
use crate::store::{Message, PeerWait, Shared, State};
use crate::types::{TAG_DEADLOCK, TAG_RECEIVED, TAG_WAITING};
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Spawns the worker owning the inbound channel from `peer`.
pub(crate) fn spawn(peer: usize, mut inbound: File, shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
	thread::Builder::new()
		.name(format!("peer_recv_{}", peer))
		.spawn(move || run(peer, &mut inbound, &shared))
}

fn run(peer: usize, inbound: &mut File, shared: &Shared) {
	loop {
		let (header, payload) = match msg::read_frame(inbound) {
			Ok(frame) => frame,
			Err(e) => {
				// Clean close and read failure both mean the peer is gone.
				debug!("peer {} channel closed: {}", peer, e);
				let mut state = shared.state.lock();
				state.peers[peer].closed = true;
				if state.slot.is_waiting_on(peer) {
					shared.wakeup.notify_all();
				}
				return;
			}
		};
		trace!(
			"frame from peer {}: tag {}, count {}",
			peer,
			header.tag,
			header.count
		);

		let mut state = shared.state.lock();
		match header.tag {
			TAG_WAITING => on_waiting(peer, &payload, &mut state, shared),
			TAG_RECEIVED => on_received(peer, &payload, &mut state),
			TAG_DEADLOCK => on_deadlock(peer, &mut state, shared),
			_ => on_message(peer, header, payload, &mut state, shared),
		}
	}
}

/// The peer advertises that it is blocked receiving `(count, tag)` from us.
fn on_waiting(peer: usize, payload: &[u8], state: &mut State, shared: &Shared) {
	let (count, tag) = match msg::decode_pair(payload) {
		Ok(pair) => pair,
		Err(e) => {
			error!("malformed WAITING frame from peer {}: {}", peer, e);
			return;
		}
	};
	// A send already in flight will satisfy the peer; its RECEIVED
	// acknowledgement clears the record later.
	if state.peers[peer].has_pending_send(count, tag) {
		trace!("peer {} wait ({}, {}) already satisfied in flight", peer, count, tag);
		return;
	}
	state.peers[peer].waits.push_back(PeerWait { count, tag });
	// Both sides blocked on each other with nothing in flight: deadlock.
	if state.slot.is_waiting_on(peer) && !state.slot.delivered {
		state.slot.deadlocked = true;
		shared.wakeup.notify_all();
	}
}

/// The peer consumed one of our sends; retire the outstanding record.
fn on_received(peer: usize, payload: &[u8], state: &mut State) {
	let (count, tag) = match msg::decode_pair(payload) {
		Ok(pair) => pair,
		Err(e) => {
			error!("malformed RECEIVED frame from peer {}: {}", peer, e);
			return;
		}
	};
	if state.peers[peer].take_pending_send(count, tag).is_none() {
		debug!(
			"RECEIVED ({}, {}) from peer {} matched no outstanding send",
			count, tag, peer
		);
	}
}

/// The peer concluded the mutual wait first. The placeholder keeps the
/// advertised-wait pop in `recv` symmetric with the self-detected case.
fn on_deadlock(peer: usize, state: &mut State, shared: &Shared) {
	state.peers[peer].waits.push_back(PeerWait {
		count: 0,
		tag: TAG_DEADLOCK,
	});
	state.slot.deadlocked = true;
	shared.wakeup.notify_all();
}

/// User payloads and buffered reserved tags (collective traffic) go to the
/// peer's inbox; the armed slot is resolved if the new message satisfies it.
fn on_message(peer: usize, header: Header, payload: Vec<u8>, state: &mut State, shared: &Shared) {
	state.peers[peer].inbox.push_back(Message {
		tag: header.tag,
		count: header.count,
		payload,
	});
	if !state.slot.delivered && state.slot.matches(peer, header.count, header.tag) {
		state.slot.delivered = true;
		shared.wakeup.notify_all();
	}
}
