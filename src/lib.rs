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

//! Message passing for a fixed group of cooperating processes on a single
//! host. Each rank talks to every other over pre-established byte-stream
//! channels; on top of those the runtime offers tagged point-to-point
//! send/recv with out-of-order matching, tree-shaped barrier, broadcast and
//! reduction collectives, and an optional detector for two ranks caught
//! waiting on each other.
//!
//! A process joins its group with [`Cohort::init`] (when started by
//! `cohortrun`) or [`Cohort::connect`] (when the embedder wires channels
//! itself), exchanges messages, and leaves with [`Cohort::finalize`].

#[macro_use]
extern crate log;

mod chan;
mod collective;
mod comm;
mod conn;
mod msg;
mod store;
mod types;

pub mod launch;

pub use crate::chan::{pipe, Link, CHANNEL_FD_BASE, RANK_ENV, WORLD_SIZE_ENV};
pub use crate::comm::Cohort;
pub use crate::types::{Error, ReduceOp, ANY_TAG};
