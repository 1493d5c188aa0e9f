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

mod common;

use cohort::{pipe, Cohort, Error, Link, ANY_TAG};
use rand::{thread_rng, Rng};
use std::thread;
use std::time::Duration;

#[test]
fn ring_pass() {
	common::group(4, false, |mut member| {
		let n = member.world_size();
		let rank = member.world_rank();
		let next = (rank + 1) % n;
		let prev = (rank + n - 1) % n;

		member.send(next, &[rank as u8], 7).unwrap();
		let mut buf = [0u8; 1];
		member.recv(prev, &mut buf, 7).unwrap();
		assert_eq!(buf[0], prev as u8);
		member.finalize();
	});
}

#[test]
fn wildcard_drains_in_arrival_order() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 1 {
			member.send(0, b"A", 5).unwrap();
			member.send(0, b"B", 9).unwrap();
		} else {
			let mut buf = [0u8; 1];
			member.recv(1, &mut buf, ANY_TAG).unwrap();
			assert_eq!(&buf, b"A");
			member.recv(1, &mut buf, ANY_TAG).unwrap();
			assert_eq!(&buf, b"B");
		}
		member.finalize();
	});
}

#[test]
fn tagged_recv_selects_across_arrival_order() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 1 {
			member.send(0, b"first", 3).unwrap();
			member.send(0, b"second", 8).unwrap();
		} else {
			let mut buf = [0u8; 6];
			member.recv(1, &mut buf, 8).unwrap();
			assert_eq!(&buf, b"second");
			let mut buf = [0u8; 5];
			member.recv(1, &mut buf, 3).unwrap();
			assert_eq!(&buf, b"first");
		}
		member.finalize();
	});
}

#[test]
fn same_tag_stream_is_fifo() {
	common::group(2, false, |mut member| {
		const ROUNDS: usize = 16;
		if member.world_rank() == 1 {
			for i in 0..ROUNDS {
				member.send(0, &[i as u8; 8], 4).unwrap();
			}
		} else {
			for i in 0..ROUNDS {
				let mut buf = [0u8; 8];
				member.recv(1, &mut buf, 4).unwrap();
				assert_eq!(buf, [i as u8; 8]);
			}
		}
		member.finalize();
	});
}

#[test]
fn recv_completes_after_late_send() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 1 {
			thread::sleep(Duration::from_millis(50));
			member.send(0, b"late", 2).unwrap();
		} else {
			let mut buf = [0u8; 4];
			member.recv(1, &mut buf, 2).unwrap();
			assert_eq!(&buf, b"late");
		}
		member.finalize();
	});
}

#[test]
fn echo_round_trip_large_payload() {
	common::group(2, false, |mut member| {
		const LEN: usize = 8192;
		if member.world_rank() == 0 {
			let mut rng = thread_rng();
			let payload: Vec<u8> = (0..LEN).map(|_| rng.gen()).collect();
			member.send(1, &payload, 2).unwrap();
			let mut back = vec![0u8; LEN];
			member.recv(1, &mut back, 2).unwrap();
			assert_eq!(back, payload);
		} else {
			let mut buf = vec![0u8; LEN];
			member.recv(0, &mut buf, 2).unwrap();
			member.send(0, &buf, 2).unwrap();
		}
		member.finalize();
	});
}

#[test]
fn zero_length_payload_round_trips() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 0 {
			member.send(1, &[], 11).unwrap();
		} else {
			member.recv(0, &mut [], 11).unwrap();
		}
		member.finalize();
	});
}

#[test]
fn recv_from_finished_peer_reports_remote_finished() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 1 {
			member.finalize();
		} else {
			let mut buf = [0u8; 4];
			assert_eq!(member.recv(1, &mut buf, ANY_TAG), Err(Error::RemoteFinished));
			member.finalize();
		}
	});
}

#[test]
fn finished_peer_backlog_still_drains() {
	common::group(2, false, |mut member| {
		if member.world_rank() == 1 {
			member.send(0, b"bye", 6).unwrap();
			member.finalize();
		} else {
			thread::sleep(Duration::from_millis(50));
			let mut buf = [0u8; 3];
			member.recv(1, &mut buf, 6).unwrap();
			assert_eq!(&buf, b"bye");
			assert_eq!(member.recv(1, &mut buf, 6), Err(Error::RemoteFinished));
			member.finalize();
		}
	});
}

#[test]
fn send_to_vanished_peer_reports_remote_finished() {
	// Hand-wired world where peer 1 dropped both of its channel ends.
	let (inbound_read, inbound_write) = pipe().unwrap();
	let (outbound_read, outbound_write) = pipe().unwrap();
	drop(inbound_write);
	drop(outbound_read);

	let links = vec![
		None,
		Some(Link {
			inbound: inbound_read,
			outbound: outbound_write,
		}),
	];
	let mut member = Cohort::connect(0, links, false).unwrap();
	assert_eq!(member.send(1, b"x", 1), Err(Error::RemoteFinished));
	let mut buf = [0u8; 1];
	assert_eq!(member.recv(1, &mut buf, 1), Err(Error::RemoteFinished));
	member.finalize();
}

#[test]
fn rank_validation_touches_no_channel() {
	let mut solo = Cohort::connect(0, vec![None], false).unwrap();
	assert_eq!(solo.send(0, b"x", 1), Err(Error::SelfOp));
	assert_eq!(solo.recv(0, &mut [0u8; 1], 1), Err(Error::SelfOp));
	assert_eq!(solo.send(3, b"x", 1), Err(Error::NoSuchRank(3)));
	assert_eq!(solo.recv(3, &mut [0u8; 1], 1), Err(Error::NoSuchRank(3)));
	solo.finalize();
}
