//! Benchmarks of the translation core.
//!
//! Supports sequential/random write and read workloads over the
//! in-memory NAND model, with and without FDP placement. Write amount
//! and overwrite ratio are configurable per bench. Results are displayed
//! as throughput in MiB/sec together with the observed write
//! amplification.
use openssd_ftl::*;

use std::time::{Duration, Instant};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

fn main() {
    let benches = vec![
        BenchBuilder::new("FtlCore::write_seq")
            .io_type(IoType::Write)
            .io_pattern(IoPattern::Seq)
            .total_bytes(64 * MIB)
            .build(),
        BenchBuilder::new("FtlCore::write_rnd")
            .io_type(IoType::Write)
            .io_pattern(IoPattern::Rnd)
            .total_bytes(64 * MIB)
            .build(),
        BenchBuilder::new("FtlCore::read_seq")
            .io_type(IoType::Read)
            .io_pattern(IoPattern::Seq)
            .total_bytes(64 * MIB)
            .build(),
        // FDP writes land in one reclaim group, so the working set stays
        // below that group's capacity.
        BenchBuilder::new("FtlCore::write_rnd_fdp")
            .io_type(IoType::Write)
            .io_pattern(IoPattern::Rnd)
            .total_bytes(64 * MIB)
            .working_set(3072)
            .fdp(true)
            .build(),
    ];

    for bench in benches {
        let report = bench.run();
        println!("{report}");
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IoType {
    Read,
    Write,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IoPattern {
    Seq,
    Rnd,
}

struct Bench {
    name: String,
    io_type: IoType,
    io_pattern: IoPattern,
    total_bytes: usize,
    working_set: Option<usize>,
    fdp: bool,
}

struct BenchBuilder {
    name: String,
    io_type: IoType,
    io_pattern: IoPattern,
    total_bytes: usize,
    working_set: Option<usize>,
    fdp: bool,
}

impl BenchBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            io_type: IoType::Write,
            io_pattern: IoPattern::Seq,
            total_bytes: MIB,
            working_set: None,
            fdp: false,
        }
    }

    fn io_type(mut self, io_type: IoType) -> Self {
        self.io_type = io_type;
        self
    }

    fn io_pattern(mut self, io_pattern: IoPattern) -> Self {
        self.io_pattern = io_pattern;
        self
    }

    fn total_bytes(mut self, total_bytes: usize) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    fn working_set(mut self, slices: usize) -> Self {
        self.working_set = Some(slices);
        self
    }

    fn fdp(mut self, fdp: bool) -> Self {
        self.fdp = fdp;
        self
    }

    fn build(self) -> Bench {
        Bench {
            name: self.name,
            io_type: self.io_type,
            io_pattern: self.io_pattern,
            total_bytes: self.total_bytes,
            working_set: self.working_set,
            fdp: self.fdp,
        }
    }
}

impl Bench {
    fn run(&self) -> String {
        let config = FtlConfig::default();
        let bytes_per_slice = config.geometry.bytes_per_slice;
        let user_slices = config.user_slices;
        let nand = MemNand::new(config.geometry);
        let fdp_config = self.fdp.then(FdpConfig::default);
        let mut core = FtlCore::new(config, fdp_config, nand).expect("core setup");
        let placement = self.fdp.then(PlacementSpec::default);

        // Reads need data in place first.
        if self.io_type == IoType::Read {
            let payload = vec![0x5Au8; bytes_per_slice];
            for lsa in 0..user_slices as Lsa {
                core.write(lsa, &payload, placement).expect("prefill");
            }
        }
        WAF_STATS.reset();

        let total_slices = self.total_bytes / bytes_per_slice;
        let span = self.working_set.unwrap_or(user_slices).min(user_slices);
        let mut rng = Lcg::new(0x5eed);
        let payload = vec![0xA5u8; bytes_per_slice];
        let mut readback = vec![0u8; bytes_per_slice];

        let start = Instant::now();
        for i in 0..total_slices {
            let lsa = match self.io_pattern {
                IoPattern::Seq => (i % span) as Lsa,
                IoPattern::Rnd => (rng.next() as usize % span) as Lsa,
            };
            match self.io_type {
                IoType::Write => core.write(lsa, &payload, placement).expect("bench write"),
                IoType::Read => core.read(lsa, &mut readback).expect("bench read"),
            }
        }
        let elapsed = start.elapsed();

        format!(
            "{:<26} {:>12} {:>14} waf {:.3}",
            self.name,
            DisplayData(self.total_bytes),
            DisplayThroughput(self.total_bytes, elapsed),
            WAF_STATS.waf(),
        )
    }
}

/// A small deterministic generator, enough to scatter the workload.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

struct DisplayData(usize);

impl std::fmt::Display for DisplayData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 >= MIB {
            write!(f, "{:.1} MiB", self.0 as f64 / MIB as f64)
        } else {
            write!(f, "{:.1} KiB", self.0 as f64 / KIB as f64)
        }
    }
}

struct DisplayThroughput(usize, Duration);

impl std::fmt::Display for DisplayThroughput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.1.as_secs_f64();
        let mibps = if secs > 0.0 {
            self.0 as f64 / MIB as f64 / secs
        } else {
            f64::INFINITY
        };
        write!(f, "{mibps:.1} MiB/s")
    }
}
