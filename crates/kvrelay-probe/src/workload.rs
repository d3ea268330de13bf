//! Randomized command mix with a hot key set.

use kvrelay_domain::Command;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Share of reads aimed at the hot keys.
const HOT_READ_SHARE: f64 = 0.8;

/// Generates a read-heavy mix of string and hash commands over a fixed key space.
///
/// A fifth of the keys are "hot" and receive most reads, so the cache has
/// something to work with.
#[derive(Debug)]
pub struct WorkloadGenerator {
    keys: usize,
    hot_keys: usize,
    write_ratio: f64,
    rng: StdRng,
}

impl WorkloadGenerator {
    pub fn new(keys: usize, write_ratio: f64, seed: Option<u64>) -> Self {
        let keys = keys.max(1);
        Self {
            keys,
            hot_keys: (keys / 5).max(1),
            write_ratio: if write_ratio.is_finite() {
                write_ratio.clamp(0.0, 1.0)
            } else {
                0.0
            },
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }

    pub fn key_name(index: usize) -> String {
        format!("probe:{index}")
    }

    /// Commands that load every key once.
    pub fn seed_commands(&self) -> Vec<Command> {
        (0..self.keys)
            .map(|i| {
                if i % 2 == 0 {
                    Command::with_args("SET", [Self::key_name(i), format!("value-{i}")])
                } else {
                    Command::with_args(
                        "HSET",
                        [Self::key_name(i), "field".to_string(), format!("value-{i}")],
                    )
                }
            })
            .collect()
    }

    fn pick_key(&mut self) -> usize {
        if self.rng.gen_bool(HOT_READ_SHARE) {
            self.rng.gen_range(0..self.hot_keys)
        } else {
            self.rng.gen_range(0..self.keys)
        }
    }

    pub fn next_command(&mut self) -> Command {
        let index = self.pick_key();
        let key = Self::key_name(index);
        let is_hash = index % 2 == 1;

        if self.rng.gen_bool(self.write_ratio) {
            let value = format!("value-{}", self.rng.r#gen::<u32>());
            return match (is_hash, self.rng.gen_range(0..10)) {
                (_, 0) => Command::new("DEL").arg(key),
                (true, _) => Command::with_args("HSET", [key, "field".to_string(), value]),
                (false, _) => Command::with_args("SET", [key, value]),
            };
        }

        match (is_hash, self.rng.gen_bool(0.5)) {
            (true, true) => Command::new("HGETALL").arg(key),
            (true, false) => Command::with_args("HGET", [key, "field".to_string()]),
            (false, true) => Command::new("GET").arg(key),
            (false, false) => Command::new("STRLEN").arg(key),
        }
    }
}
