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

//! The per-process communication runtime. A `Cohort` owns the write ends of
//! every outbound channel, an `N - 1` pool of receiver workers for the
//! inbound ones, and the rendezvous through which `recv` blocks until a
//! worker hands it a match or a terminating condition.

use crate::chan::{self, Link};
use crate::conn;
use crate::msg;
use crate::store::{Message, PendingSend, Shared};
use crate::types::{
	is_user_tag, Error, ReduceOp, ANY_TAG, TAG_DEADLOCK, TAG_NO_MESSAGE, TAG_RECEIVED, TAG_WAITING,
};
use std::env;
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Runtime handle of one group member. All messaging goes through `&mut
/// self`: the library serves exactly one user call at a time, which is what
/// the single rendezvous slot relies on.
pub struct Cohort {
	rank: usize,
	world_size: usize,
	detect_deadlock: bool,
	/// Write ends of the self-to-peer channels, `None` at the own rank and
	/// after `finalize` has dropped them.
	outbound: Vec<Option<File>>,
	shared: Arc<Shared>,
	workers: Vec<JoinHandle<()>>,
}

impl Cohort {
	/// Joins the group this process was launched into: reads the size and
	/// rank published by the launcher, adopts the pre-wired channel
	/// descriptors and spawns the receiver workers. Must be called once,
	/// before any other operation.
	pub fn init(detect_deadlock: bool) -> io::Result<Cohort> {
		let world_size = env_usize(chan::WORLD_SIZE_ENV)?;
		let rank = env_usize(chan::RANK_ENV)?;
		if world_size == 0 || rank >= world_size {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("rank {} out of range for world size {}", rank, world_size),
			));
		}
		let links = chan::adopt_links(world_size, rank)?;
		Cohort::connect(rank, links, detect_deadlock)
	}

	/// Builds a runtime from explicitly wired links, one per remote peer in
	/// rank order with `None` at `rank` itself. This is the entry point for
	/// tests and for embedders that wire their own channels.
	pub fn connect(rank: usize, links: Vec<Option<Link>>, detect_deadlock: bool) -> io::Result<Cohort> {
		chan::ignore_sigpipe();
		let world_size = links.len();
		if rank >= world_size {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("rank {} out of range for world size {}", rank, world_size),
			));
		}
		let shared = Arc::new(Shared::new(world_size));
		let mut outbound = Vec::with_capacity(world_size);
		let mut workers = Vec::with_capacity(world_size.saturating_sub(1));
		for (peer, link) in links.into_iter().enumerate() {
			match link {
				Some(link) if peer != rank => {
					workers.push(conn::spawn(peer, link.inbound, shared.clone())?);
					outbound.push(Some(link.outbound));
				}
				_ => outbound.push(None),
			}
		}
		debug!(
			"rank {} of {} up, {} workers, deadlock detection {}",
			rank,
			world_size,
			workers.len(),
			if detect_deadlock { "on" } else { "off" }
		);
		Ok(Cohort {
			rank,
			world_size,
			detect_deadlock,
			outbound,
			shared,
			workers,
		})
	}

	/// Number of ranks in the group.
	pub fn world_size(&self) -> usize {
		self.world_size
	}

	/// The caller's rank, in `[0, world_size)`.
	pub fn world_rank(&self) -> usize {
		self.rank
	}

	/// Sends `data` to `peer` under `tag`. Completes as soon as the frame
	/// is handed to the channel; a matching `recv` may run at any later
	/// point. Tags must be non-negative, negative values are reserved.
	pub fn send(&mut self, peer: usize, data: &[u8], tag: i64) -> Result<(), Error> {
		debug_assert!(tag >= ANY_TAG, "negative tags are reserved for the runtime");
		self.send_tagged(peer, data, tag)
	}

	/// Receives a message of exactly `buf.len()` bytes from `peer` into
	/// `buf`. `ANY_TAG` matches any non-reserved tag; messages from one
	/// peer are matched in arrival order. Blocks until a match arrives, the
	/// peer finishes, or (with detection on) a mutual wait is discovered.
	pub fn recv(&mut self, peer: usize, buf: &mut [u8], tag: i64) -> Result<(), Error> {
		debug_assert!(tag >= ANY_TAG, "negative tags are reserved for the runtime");
		self.recv_tagged(peer, buf, tag)
	}

	pub(crate) fn send_tagged(&mut self, peer: usize, data: &[u8], tag: i64) -> Result<(), Error> {
		self.check_peer(peer)?;
		let count = data.len() as i64;
		if self.detect_deadlock && is_user_tag(tag) {
			let mut state = self.shared.state.lock();
			let peer_state = &mut state.peers[peer];
			// The peer may already have advertised this very wait.
			peer_state.drop_satisfied_wait(count, tag);
			peer_state.pending_sends.push_back(PendingSend { count, tag });
		}
		self.write_frame(peer, tag, data)
	}

	pub(crate) fn recv_tagged(&mut self, peer: usize, buf: &mut [u8], tag: i64) -> Result<(), Error> {
		self.check_peer(peer)?;
		let count = buf.len() as i64;
		let shared = self.shared.clone();
		let mut state = shared.state.lock();

		// Fast path: already buffered. Buffered messages outrank the
		// peer-closed flag so a finished peer's backlog still drains.
		if let Some(message) = state.peers[peer].take_matching(count, tag) {
			drop(state);
			self.deliver(peer, message, buf);
			return Ok(());
		}

		state.slot.arm(peer, count, tag);

		if self.detect_deadlock && is_user_tag(tag) {
			if state.peers[peer].peer_is_waiting() {
				// The peer is already blocked on us and we are about to
				// block on it: conclude the deadlock on this side and tell
				// the other.
				state.peers[peer].waits.pop_front();
				state.slot.reset();
				drop(state);
				let _ = self.write_frame(peer, TAG_DEADLOCK, &[]);
				return Err(Error::DeadlockDetected);
			}
			// Advertise our wait so the peer can detect the symmetric case.
			// Channel I/O stays outside the lock.
			drop(state);
			let pair = msg::encode_pair(count, tag);
			let _ = self.write_frame(peer, TAG_WAITING, &pair);
			state = shared.state.lock();
		}

		while !(state.slot.delivered || state.slot.deadlocked || state.peers[peer].closed) {
			shared.wakeup.wait(&mut state);
		}

		// A delivery that raced the deadlock verdict wins: the message
		// exists, so the wait was not mutual after all.
		if state.slot.delivered {
			state.slot.reset();
			let message = state
				.peers[peer]
				.take_matching(count, tag)
				.expect("wait-slot delivered without a buffered match");
			drop(state);
			self.deliver(peer, message, buf);
			return Ok(());
		}
		if state.slot.deadlocked {
			state.peers[peer].waits.pop_front();
			state.slot.reset();
			return Err(Error::DeadlockDetected);
		}
		// Peer closed with nothing delivered.
		state.slot.reset();
		Err(Error::RemoteFinished)
	}

	/// Copies (or, for reduction tags, folds) the payload into the caller's
	/// buffer and acknowledges consumption when the peer tracks our waits.
	fn deliver(&mut self, peer: usize, message: Message, buf: &mut [u8]) {
		if let Some(op) = ReduceOp::from_tag(message.tag) {
			op.fold(buf, &message.payload);
		} else if message.tag != TAG_NO_MESSAGE {
			buf.copy_from_slice(&message.payload);
		}
		if self.detect_deadlock && is_user_tag(message.tag) {
			// Best effort: a finished peer no longer tracks outstanding
			// sends, so a failed acknowledgement is not an error here.
			let pair = msg::encode_pair(message.count, message.tag);
			let _ = self.write_frame(peer, TAG_RECEIVED, &pair);
		}
	}

	fn write_frame(&mut self, peer: usize, tag: i64, payload: &[u8]) -> Result<(), Error> {
		let stream = match self.outbound[peer].as_mut() {
			Some(stream) => stream,
			None => return Err(Error::RemoteFinished),
		};
		msg::write_frame(stream, tag, payload).map_err(|e| {
			debug!("write to peer {} failed: {}", peer, e);
			Error::RemoteFinished
		})
	}

	fn check_peer(&self, peer: usize) -> Result<(), Error> {
		if peer == self.rank {
			return Err(Error::SelfOp);
		}
		if peer >= self.world_size {
			return Err(Error::NoSuchRank(peer));
		}
		Ok(())
	}

	/// Tears the runtime down: closes every local write end, inducing
	/// peer-close on each remote read side, then joins the receiver
	/// workers. Returns once every peer has finalized in turn and no
	/// worker is left.
	pub fn finalize(mut self) {
		debug!("rank {} finalizing", self.rank);
		for stream in self.outbound.iter_mut() {
			stream.take();
		}
		for worker in self.workers.drain(..) {
			if let Err(e) = worker.join() {
				error!("receiver worker panicked: {:?}", e);
			}
		}
	}
}

impl Drop for Cohort {
	fn drop(&mut self) {
		// Close write ends so peers observe termination even when the user
		// never called finalize. Workers are only joined by `finalize`;
		// they exit on their own once every peer has closed.
		for stream in self.outbound.iter_mut() {
			stream.take();
		}
	}
}

fn env_usize(key: &str) -> io::Result<usize> {
	let value = env::var(key).map_err(|_| {
		io::Error::new(
			io::ErrorKind::NotFound,
			format!("{} is not set; was this process started by cohortrun?", key),
		)
	})?;
	value.parse::<usize>().map_err(|_| {
		io::Error::new(
			io::ErrorKind::InvalidData,
			format!("{}={} is not a valid rank count", key, value),
		)
	})
}
