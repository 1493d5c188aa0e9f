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

//! Tree collectives. Barrier, broadcast and reduce all walk the same
//! binomial tree anchored at rank 0 in two phases, leaves-to-root then
//! root-to-leaves; for a collective rooted elsewhere, rank 0 and the root
//! swap places so the tree shape never changes. Built entirely on the
//! point-to-point layer with reserved tags.

use crate::comm::Cohort;
use crate::types::{Error, ReduceOp, TAG_BROADCAST, TAG_NO_MESSAGE};

/// Largest power of two not exceeding `r`. Callers guarantee `r > 0`.
fn pow2_floor(r: usize) -> usize {
	let mut p = 1;
	while p * 2 <= r {
		p *= 2;
	}
	p
}

/// Parent of `r` in the tree anchored at 0, `None` at the root.
fn parent(r: usize) -> Option<usize> {
	if r == 0 {
		None
	} else {
		Some(r - pow2_floor(r))
	}
}

/// Children of `r` within a world of `n` ranks, ascending.
fn children(r: usize, n: usize) -> Vec<usize> {
	let mut out = Vec::new();
	let mut step = if r == 0 { 1 } else { pow2_floor(r) * 2 };
	while r + step < n {
		out.push(r + step);
		step *= 2;
	}
	out
}

/// Swaps 0 and `root`, anchoring every collective at the same tree shape.
/// The relabelling is its own inverse.
fn relabel(rank: usize, root: usize) -> usize {
	if rank == root {
		0
	} else if rank == 0 {
		root
	} else {
		rank
	}
}

impl Cohort {
	/// Blocks until every rank has entered the barrier; the downward phase
	/// releases all ranks together.
	pub fn barrier(&mut self) -> Result<(), Error> {
		self.ascend(0, TAG_NO_MESSAGE, &mut [])?;
		self.descend(0, TAG_NO_MESSAGE, &mut [])
	}

	/// Replicates the root's `data` onto every rank: read at the root,
	/// overwritten everywhere else. Every rank must pass the same length.
	pub fn broadcast(&mut self, data: &mut [u8], root: usize) -> Result<(), Error> {
		self.check_root(root)?;
		// The upward rendezvous makes sure nobody consumes payload frames
		// from an earlier, still-draining collective.
		self.ascend(root, TAG_NO_MESSAGE, &mut [])?;
		self.descend(root, TAG_BROADCAST, data)
	}

	/// Reduces every rank's `send_data` elementwise with `op`; the result
	/// lands in `recv_data` at the root, other ranks' `recv_data` is left
	/// untouched. Panics if the root's two buffers differ in length.
	pub fn reduce(
		&mut self,
		send_data: &[u8],
		recv_data: &mut [u8],
		op: ReduceOp,
		root: usize,
	) -> Result<(), Error> {
		self.check_root(root)?;
		let mut working = send_data.to_vec();
		self.ascend(root, op.tag(), &mut working)?;
		if self.world_rank() == root {
			recv_data.copy_from_slice(&working);
		}
		// Downward sync so every rank leaves with a consistent verdict.
		self.descend(root, TAG_NO_MESSAGE, &mut [])
	}

	/// Leaves-to-root phase: gather from every child, then hand the buffer
	/// to the parent. Reduction tags fold child payloads into `buf` on
	/// receive, so interior nodes accumulate their whole subtree.
	fn ascend(&mut self, root: usize, tag: i64, buf: &mut [u8]) -> Result<(), Error> {
		let n = self.world_size();
		let me = relabel(self.world_rank(), root);
		for child in children(me, n) {
			self.recv_tagged(relabel(child, root), buf, tag)?;
		}
		if let Some(parent) = parent(me) {
			self.send_tagged(relabel(parent, root), buf, tag)?;
		}
		Ok(())
	}

	/// Root-to-leaves phase: take the buffer from the parent, pass it on to
	/// every child.
	fn descend(&mut self, root: usize, tag: i64, buf: &mut [u8]) -> Result<(), Error> {
		let n = self.world_size();
		let me = relabel(self.world_rank(), root);
		if let Some(parent) = parent(me) {
			self.recv_tagged(relabel(parent, root), buf, tag)?;
		}
		for child in children(me, n) {
			self.send_tagged(relabel(child, root), buf, tag)?;
		}
		Ok(())
	}

	fn check_root(&self, root: usize) -> Result<(), Error> {
		if root >= self.world_size() {
			return Err(Error::NoSuchRank(root));
		}
		Ok(())
	}
}
