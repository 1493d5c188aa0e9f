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

//! Process-group launcher. Builds the full mesh of unidirectional channels
//! for `n` ranks, spawns `n` copies of the target program with every
//! channel end `dup2`'d to its deterministic descriptor, publishes size and
//! rank through the environment, and reaps the whole group.

use crate::chan::{self, CHANNEL_FD_BASE};
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus};

/// One wired channel of the mesh, still held by the launcher.
struct ChannelPair {
	sender: usize,
	receiver: usize,
	read: File,
	write: File,
}

/// Runs `prog` as a group of `n` ranks and reaps every child, returning
/// the exit statuses in rank order. Rank `i` sees `COHORT_WORLD_SIZE=n`
/// and `COHORT_RANK=i` in its environment; rank assignment rides in each
/// child's own environment rather than any pid-keyed scheme, so process-id
/// reuse cannot misassign ranks.
pub fn run_group(n: usize, prog: &str, args: &[String]) -> io::Result<Vec<ExitStatus>> {
	if n == 0 {
		return Err(io::Error::new(
			io::ErrorKind::InvalidInput,
			"world size must be at least 1",
		));
	}
	let channels = wire_mesh(n)?;
	let mut children = Vec::with_capacity(n);
	for rank in 0..n {
		children.push(spawn_rank(n, rank, prog, args, &channels)?);
	}
	// The children own their ends now; the launcher must not keep write
	// ends open or peers would never observe close.
	drop(channels);

	let mut statuses = Vec::with_capacity(n);
	for (rank, mut child) in children.into_iter().enumerate() {
		let status = child.wait()?;
		if status.success() {
			debug!("rank {} exited cleanly", rank);
		} else {
			warn!("rank {} exited with {}", rank, status);
		}
		statuses.push(status);
	}
	Ok(statuses)
}

/// Creates one pipe per ordered rank pair. Pipe descriptors are parked
/// above the dup2 window so no source descriptor collides with a target.
fn wire_mesh(n: usize) -> io::Result<Vec<ChannelPair>> {
	let floor = CHANNEL_FD_BASE + 2 * (n * n) as i32;
	let mut channels = Vec::with_capacity(n * (n - 1));
	for receiver in 0..n {
		for sender in 0..n {
			if sender == receiver {
				continue;
			}
			let (read, write) = chan::pipe()?;
			channels.push(ChannelPair {
				sender,
				receiver,
				read: park_above(read, floor)?,
				write: park_above(write, floor)?,
			});
		}
	}
	Ok(channels)
}

/// Moves a descriptor to the first free slot at or above `floor`; the
/// original closes when `file` drops at the end of this call.
fn park_above(file: File, floor: RawFd) -> io::Result<File> {
	let fd = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_DUPFD, floor) };
	if fd < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(unsafe { File::from_raw_fd(fd) })
}

fn spawn_rank(
	n: usize,
	rank: usize,
	prog: &str,
	args: &[String],
	channels: &[ChannelPair],
) -> io::Result<Child> {
	let mut command = Command::new(prog);
	command
		.args(args)
		.env(chan::WORLD_SIZE_ENV, n.to_string())
		.env(chan::RANK_ENV, rank.to_string());

	// (source, dup2 target) for every channel end this rank keeps.
	let mut table: Vec<(RawFd, RawFd)> = Vec::new();
	for pair in channels {
		if pair.receiver == rank {
			table.push((
				pair.read.as_raw_fd(),
				chan::read_fd(n, pair.sender, pair.receiver),
			));
		}
		if pair.sender == rank {
			table.push((
				pair.write.as_raw_fd(),
				chan::write_fd(n, pair.sender, pair.receiver),
			));
		}
	}
	// Every parked descriptor the child inherits, its own included; the
	// dup2 copies survive, the parked originals must not.
	let parked: Vec<RawFd> = channels
		.iter()
		.flat_map(|pair| vec![pair.read.as_raw_fd(), pair.write.as_raw_fd()])
		.collect();

	unsafe {
		command.pre_exec(move || {
			// Between fork and exec only async-signal-safe calls are
			// allowed, hence raw dup2/close.
			for &(source, target) in &table {
				if libc::dup2(source, target) < 0 {
					return Err(io::Error::last_os_error());
				}
			}
			for &fd in &parked {
				libc::close(fd);
			}
			Ok(())
		});
	}
	command.spawn()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_ranks_is_rejected() {
		assert!(run_group(0, "true", &[]).is_err());
	}

	#[test]
	fn reaps_a_trivial_group() {
		// Children that never touch their channels still exit; the
		// launcher must reap all of them and report their statuses.
		let statuses = run_group(3, "true", &[]).unwrap();
		assert_eq!(statuses.len(), 3);
		assert!(statuses.iter().all(|status| status.success()));
	}

	#[test]
	fn propagates_child_exit_codes() {
		let statuses = run_group(2, "false", &[]).unwrap();
		assert!(statuses.iter().all(|status| !status.success()));
	}
}
