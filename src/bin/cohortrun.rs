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

//! `cohortrun <world size> <program> [args...]` — launches one program as a
//! cohort of cooperating ranks and waits for the whole group. Exits zero
//! once every rank has been reaped.

use std::env;
use std::process::exit;

fn main() {
	env_logger::init();

	let mut args = env::args().skip(1);
	let world_size = match args.next().and_then(|v| v.parse::<usize>().ok()) {
		Some(n) if n > 0 => n,
		_ => usage(),
	};
	let prog = match args.next() {
		Some(prog) => prog,
		None => usage(),
	};
	let rest: Vec<String> = args.collect();

	match cohort::launch::run_group(world_size, &prog, &rest) {
		Ok(_) => exit(0),
		Err(e) => {
			eprintln!("cohortrun: {}", e);
			exit(1);
		}
	}
}

fn usage() -> ! {
	eprintln!("usage: cohortrun <world size> <program> [args...]");
	exit(2);
}
