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

//! Shared types for the cohort runtime: error codes, the tag space and the
//! reduction operators.

use thiserror::Error;

/// Wildcard receive tag. A receive posted with `ANY_TAG` matches any
/// non-reserved tag from the requested peer.
pub const ANY_TAG: i64 = 0;

// Reserved tags are negative, private to the runtime and never enter the
// user-visible message store.
pub(crate) const TAG_NO_MESSAGE: i64 = -1;
pub(crate) const TAG_BROADCAST: i64 = -2;
pub(crate) const TAG_DEADLOCK: i64 = -3;
pub(crate) const TAG_WAITING: i64 = -4;
pub(crate) const TAG_RECEIVED: i64 = -5;
pub(crate) const TAG_MAX: i64 = -6;

/// Errors surfaced by the messaging API. Success is `Ok(())`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// The addressed rank is outside the group.
	#[error("no such rank: {0}")]
	NoSuchRank(usize),
	/// Point-to-point operation addressed to the calling rank itself.
	#[error("operation addressed to the calling rank")]
	SelfOp,
	/// The remote rank has finished and can no longer take part.
	#[error("remote group member has finished")]
	RemoteFinished,
	/// Two ranks were caught waiting on each other with nothing in flight.
	#[error("deadlock detected")]
	DeadlockDetected,
}

/// Elementwise reduction operators over byte payloads.
///
/// Payloads are treated as arrays of unsigned 8-bit values; `Sum` and `Prod`
/// wrap modulo 2^8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
	Max,
	Min,
	Sum,
	Prod,
}

impl ReduceOp {
	/// Reserved wire tag carrying this operator's upward-phase payloads.
	pub(crate) fn tag(self) -> i64 {
		TAG_MAX - self as i64
	}

	pub(crate) fn from_tag(tag: i64) -> Option<ReduceOp> {
		match TAG_MAX - tag {
			0 => Some(ReduceOp::Max),
			1 => Some(ReduceOp::Min),
			2 => Some(ReduceOp::Sum),
			3 => Some(ReduceOp::Prod),
			_ => None,
		}
	}

	/// Folds `incoming` into `acc` elementwise.
	pub(crate) fn fold(self, acc: &mut [u8], incoming: &[u8]) {
		for (a, b) in acc.iter_mut().zip(incoming.iter()) {
			*a = match self {
				ReduceOp::Max => (*a).max(*b),
				ReduceOp::Min => (*a).min(*b),
				ReduceOp::Sum => a.wrapping_add(*b),
				ReduceOp::Prod => a.wrapping_mul(*b),
			};
		}
	}
}

/// User tags occupy the non-negative half of the tag space; everything
/// negative is reserved for the runtime.
pub(crate) fn is_user_tag(tag: i64) -> bool {
	tag >= ANY_TAG
}
