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

//! Byte-channel plumbing shared by the runtime and the launcher: pipe
//! creation, the deterministic descriptor table and the per-peer link pairs
//! the runtime is built from.

use std::fs::File;
use std::io;
use std::os::unix::io::FromRawFd;
use std::sync::Once;

/// First descriptor of the channel table wired by the launcher. The channel
/// carrying rank `s` to rank `r` occupies one even/odd descriptor pair,
/// `CHANNEL_FD_BASE + 2 * (world_size * r + s)` for the read end and the
/// next descriptor for the write end.
pub const CHANNEL_FD_BASE: i32 = 20;

/// Environment variable publishing the group size to every rank.
pub const WORLD_SIZE_ENV: &str = "COHORT_WORLD_SIZE";
/// Environment variable publishing a rank to the process holding it.
pub const RANK_ENV: &str = "COHORT_RANK";

/// The pair of stream endpoints connecting one process to one peer.
pub struct Link {
	/// Read end of the peer-to-self channel.
	pub inbound: File,
	/// Write end of the self-to-peer channel.
	pub outbound: File,
}

/// Creates one unidirectional byte channel, returning its (read, write)
/// endpoints. Dropping the write end makes any blocked read on the other
/// end return end-of-file, which the runtime reports as peer-closed.
pub fn pipe() -> io::Result<(File, File)> {
	let mut fds = [0i32; 2];
	if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

/// Descriptor holding, in the receiving process, the read end of the
/// channel from `sender` to `receiver`.
pub(crate) fn read_fd(world_size: usize, sender: usize, receiver: usize) -> i32 {
	CHANNEL_FD_BASE + 2 * (world_size * receiver + sender) as i32
}

/// Descriptor holding, in the sending process, the write end of the channel
/// from `sender` to `receiver`.
pub(crate) fn write_fd(world_size: usize, sender: usize, receiver: usize) -> i32 {
	read_fd(world_size, sender, receiver) + 1
}

/// Adopts the descriptors the launcher wired for `rank`, producing the link
/// table `Cohort::connect` expects. Fails if any expected descriptor is not
/// open, which usually means the process was not started by the launcher.
pub(crate) fn adopt_links(world_size: usize, rank: usize) -> io::Result<Vec<Option<Link>>> {
	let mut links = Vec::with_capacity(world_size);
	for peer in 0..world_size {
		if peer == rank {
			links.push(None);
			continue;
		}
		let read = read_fd(world_size, peer, rank);
		let write = write_fd(world_size, rank, peer);
		for fd in [read, write].iter() {
			if unsafe { libc::fcntl(*fd, libc::F_GETFD) } < 0 {
				return Err(io::Error::new(
					io::ErrorKind::NotFound,
					format!(
						"channel descriptor {} for peer {} is not open; was this process started by cohortrun?",
						fd, peer
					),
				));
			}
		}
		links.push(Some(Link {
			inbound: unsafe { File::from_raw_fd(read) },
			outbound: unsafe { File::from_raw_fd(write) },
		}));
	}
	Ok(links)
}

static SIGPIPE_ONCE: Once = Once::new();

/// Writes to a channel whose reader has gone must surface as errors on the
/// write call, not kill the process.
pub(crate) fn ignore_sigpipe() {
	SIGPIPE_ONCE.call_once(|| unsafe {
		libc::signal(libc::SIGPIPE, libc::SIG_IGN);
	});
}
