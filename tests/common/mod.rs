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

//! In-process group harness: wires `n` members over pipes, one per ordered
//! pair, and runs every member's body on its own thread. A member here
//! plays the role one process plays in a launched run.

#![allow(dead_code)]

use cohort::{pipe, Cohort, Link};
use std::fs::File;
use std::panic;
use std::sync::Arc;
use std::thread;

/// Builds a fully wired `n`-member group.
pub fn wire(n: usize, detect_deadlock: bool) -> Vec<Cohort> {
	let _ = env_logger::builder().is_test(true).try_init();

	let mut read_ends: Vec<Vec<Option<File>>> = matrix(n);
	let mut write_ends: Vec<Vec<Option<File>>> = matrix(n);
	for sender in 0..n {
		for receiver in 0..n {
			if sender == receiver {
				continue;
			}
			let (read, write) = pipe().expect("pipe");
			read_ends[receiver][sender] = Some(read);
			write_ends[sender][receiver] = Some(write);
		}
	}

	(0..n)
		.map(|rank| {
			let links = (0..n)
				.map(|peer| {
					if peer == rank {
						return None;
					}
					Some(Link {
						inbound: read_ends[rank][peer].take().expect("read end"),
						outbound: write_ends[rank][peer].take().expect("write end"),
					})
				})
				.collect();
			Cohort::connect(rank, links, detect_deadlock).expect("connect")
		})
		.collect()
}

/// Runs `body` once per member, each on its own thread, and propagates the
/// first panic after all threads have been joined.
pub fn group<F>(n: usize, detect_deadlock: bool, body: F)
where
	F: Fn(Cohort) + Send + Sync + 'static,
{
	let body = Arc::new(body);
	let handles: Vec<_> = wire(n, detect_deadlock)
		.into_iter()
		.map(|member| {
			let body = body.clone();
			thread::Builder::new()
				.name(format!("rank_{}", member.world_rank()))
				.spawn(move || body(member))
				.expect("spawn member thread")
		})
		.collect();

	let mut failure = None;
	for handle in handles {
		if let Err(e) = handle.join() {
			failure.get_or_insert(e);
		}
	}
	if let Some(e) = failure {
		panic::resume_unwind(e);
	}
}

fn matrix(n: usize) -> Vec<Vec<Option<File>>> {
	(0..n).map(|_| (0..n).map(|_| None).collect()).collect()
}
