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

//! Wire framing. Every frame starts with a fixed header of two little-endian
//! signed 64-bit ints, `[count, tag]`. Payload-bearing tags are followed by
//! `count` payload bytes; `NO_MESSAGE` and `DEADLOCK` frames are header-only
//! with a zero count sentinel. `WAITING` and `RECEIVED` frames embed the
//! `(count, tag)` pair they refer to as a 16-byte payload.

use crate::types::{TAG_DEADLOCK, TAG_NO_MESSAGE};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read, Write};

pub(crate) const HEADER_SIZE: usize = 16;
pub(crate) const PAIR_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
	pub count: i64,
	pub tag: i64,
}

impl Header {
	pub fn read_from<R: Read>(stream: &mut R) -> io::Result<Header> {
		let mut buf = [0u8; HEADER_SIZE];
		stream.read_exact(&mut buf)?;
		let mut slice = &buf[..];
		Ok(Header {
			count: slice.read_i64::<LittleEndian>()?,
			tag: slice.read_i64::<LittleEndian>()?,
		})
	}

	pub fn write_to<W: Write>(&self, stream: &mut W) -> io::Result<()> {
		let mut buf = [0u8; HEADER_SIZE];
		buf[..8].copy_from_slice(&self.count.to_le_bytes());
		buf[8..].copy_from_slice(&self.tag.to_le_bytes());
		stream.write_all(&buf)
	}
}

/// Whether frames with this tag carry `count` payload bytes after the header.
pub(crate) fn carries_payload(tag: i64) -> bool {
	tag != TAG_NO_MESSAGE && tag != TAG_DEADLOCK
}

/// Reads one full frame, blocking until header and payload are complete.
/// Any read failure, including a clean close of the peer's write end, is
/// reported as an error and treated as peer-closed by the caller.
pub(crate) fn read_frame<R: Read>(stream: &mut R) -> io::Result<(Header, Vec<u8>)> {
	let header = Header::read_from(stream)?;
	let mut payload = Vec::new();
	if carries_payload(header.tag) && header.count > 0 {
		payload = vec![0u8; header.count as usize];
		stream.read_exact(&mut payload)?;
	}
	Ok((header, payload))
}

/// Writes one full frame. The header's count field always reflects the
/// payload length, which is zero for header-only control tags.
pub(crate) fn write_frame<W: Write>(stream: &mut W, tag: i64, payload: &[u8]) -> io::Result<()> {
	let header = Header {
		count: payload.len() as i64,
		tag,
	};
	header.write_to(stream)?;
	if !payload.is_empty() {
		stream.write_all(payload)?;
	}
	stream.flush()
}

/// Encodes the `(count, tag)` pair embedded in `WAITING`/`RECEIVED` frames.
pub(crate) fn encode_pair(count: i64, tag: i64) -> [u8; PAIR_SIZE] {
	let mut buf = [0u8; PAIR_SIZE];
	buf[..8].copy_from_slice(&count.to_le_bytes());
	buf[8..].copy_from_slice(&tag.to_le_bytes());
	buf
}

pub(crate) fn decode_pair(mut payload: &[u8]) -> io::Result<(i64, i64)> {
	let count = payload.read_i64::<LittleEndian>()?;
	let tag = payload.read_i64::<LittleEndian>()?;
	Ok((count, tag))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{TAG_RECEIVED, TAG_WAITING};
	use std::io::Cursor;

	#[test]
	fn header_round_trip() {
		let header = Header { count: 42, tag: -3 };
		let mut wire = Vec::new();
		header.write_to(&mut wire).unwrap();
		assert_eq!(wire.len(), HEADER_SIZE);
		let decoded = Header::read_from(&mut Cursor::new(wire)).unwrap();
		assert_eq!(decoded, header);
	}

	#[test]
	fn payload_frame_round_trip() {
		let mut wire = Vec::new();
		write_frame(&mut wire, 7, b"hello").unwrap();
		let (header, payload) = read_frame(&mut Cursor::new(wire)).unwrap();
		assert_eq!(header, Header { count: 5, tag: 7 });
		assert_eq!(payload, b"hello");
	}

	#[test]
	fn control_frames_are_header_only() {
		assert!(!carries_payload(TAG_NO_MESSAGE));
		assert!(!carries_payload(TAG_DEADLOCK));
		assert!(carries_payload(TAG_WAITING));
		assert!(carries_payload(TAG_RECEIVED));
		assert!(carries_payload(0));

		let mut wire = Vec::new();
		write_frame(&mut wire, TAG_NO_MESSAGE, &[]).unwrap();
		assert_eq!(wire.len(), HEADER_SIZE);
		let (header, payload) = read_frame(&mut Cursor::new(wire)).unwrap();
		assert_eq!(header, Header { count: 0, tag: TAG_NO_MESSAGE });
		assert!(payload.is_empty());
	}

	#[test]
	fn embedded_pair_round_trip() {
		let wire = encode_pair(9, -4);
		assert_eq!(decode_pair(&wire).unwrap(), (9, -4));
	}

	#[test]
	fn truncated_frame_reports_eof() {
		let mut wire = Vec::new();
		write_frame(&mut wire, 1, &[0xAB; 16]).unwrap();
		wire.truncate(HEADER_SIZE + 4);
		assert!(read_frame(&mut Cursor::new(wire)).is_err());
	}
}
