//! Seeded randomness for delay sampling.
//!
//! [`ChaCha8Stream`] follows the chacha8rand construction: ChaCha with eight
//! rounds, four blocks computed side by side per refill, and a reseed from
//! the tail of the buffer every sixteen blocks. For a given [`Seed`] the
//! sequence of draws is fixed, which lets tests pin exact sampled delays.

use crate::error::Error;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Seed length in bytes.
pub const SEED_LEN: usize = 32;

/// Words produced per refill.
const BUF_LEN: usize = 32;
/// Words held back at the end of a reseeding buffer.
const RESEED_LEN: usize = 4;
const CTR_INC: u32 = 4;
const CTR_MAX: u32 = 16;

const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// A 256-bit randomness seed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// A fresh seed from the operating system's secure generator.
    pub fn from_entropy() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// A fixed seed from exactly 32 bytes, e.g. a 32-character string.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self, Error> {
        let bytes = bytes.as_ref();
        <[u8; SEED_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidSeedLength(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    fn words(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(self.0.chunks_exact(8)) {
            let mut le = [0u8; 8];
            le.copy_from_slice(chunk);
            *word = u64::from_le_bytes(le);
        }
        words
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({self})")
    }
}

/// Deterministic ChaCha8 random stream.
#[derive(Clone)]
pub struct ChaCha8Stream {
    key: [u64; 4],
    buf: [u64; BUF_LEN],
    counter: u32,
    index: usize,
    len: usize,
}

impl ChaCha8Stream {
    pub fn new(seed: Seed) -> Self {
        let key = seed.words();
        Self {
            key,
            buf: block(&key, 0),
            counter: 0,
            index: 0,
            len: BUF_LEN,
        }
    }

    fn refill(&mut self) {
        self.counter += CTR_INC;
        if self.counter == CTR_MAX {
            self.key.copy_from_slice(&self.buf[BUF_LEN - RESEED_LEN..]);
            self.counter = 0;
        }
        self.buf = block(&self.key, self.counter);
        self.index = 0;
        self.len = if self.counter == CTR_MAX - CTR_INC {
            BUF_LEN - RESEED_LEN
        } else {
            BUF_LEN
        };
    }

    /// Uniform value in `[0, n)`. `n` must be non-zero.
    pub fn below(&mut self, n: u64) -> u64 {
        debug_assert!(n > 0);
        if n & (n - 1) == 0 {
            return self.next_u64() & (n - 1);
        }
        let (mut hi, mut lo) = mul_wide(self.next_u64(), n);
        if lo < n {
            let threshold = n.wrapping_neg() % n;
            while lo < threshold {
                (hi, lo) = mul_wide(self.next_u64(), n);
            }
        }
        hi
    }

    /// `min + uniform[0, max - min)`, or `min` when the range is empty.
    pub fn duration(&mut self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        let delta = u64::try_from((max - min).as_nanos()).unwrap_or(u64::MAX);
        min + Duration::from_nanos(self.below(delta))
    }

    pub fn boolean(&mut self) -> bool {
        self.below(2) == 1
    }
}

impl fmt::Debug for ChaCha8Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaCha8Stream")
            .field("counter", &self.counter)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RngCore for ChaCha8Stream {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        loop {
            if self.index < self.len {
                let value = self.buf[self.index];
                self.index += 1;
                return value;
            }
            self.refill();
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for ChaCha8Stream {
    type Seed = [u8; SEED_LEN];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(Seed(seed))
    }
}

fn mul_wide(a: u64, b: u64) -> (u64, u64) {
    let product = u128::from(a) * u128::from(b);
    ((product >> 64) as u64, product as u64)
}

fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(16);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(12);
    x[a] = x[a].wrapping_add(x[b]);
    x[d] = (x[d] ^ x[a]).rotate_left(8);
    x[c] = x[c].wrapping_add(x[d]);
    x[b] = (x[b] ^ x[c]).rotate_left(7);
}

/// Four interleaved ChaCha8 blocks for counters `counter..counter + 4`.
///
/// Row `r` of the state holds word `r` of all four blocks. Only the key
/// rows (4..12) get the input added back after the rounds.
fn block(key: &[u64; 4], counter: u32) -> [u64; BUF_LEN] {
    let mut state = [[0u32; 4]; 16];
    for (row, sigma) in state.iter_mut().zip(SIGMA) {
        *row = [sigma; 4];
    }
    for (i, word) in key.iter().enumerate() {
        state[4 + 2 * i] = [*word as u32; 4];
        state[5 + 2 * i] = [(*word >> 32) as u32; 4];
    }
    state[12] = [
        counter,
        counter.wrapping_add(1),
        counter.wrapping_add(2),
        counter.wrapping_add(3),
    ];

    for lane in 0..4 {
        let mut x = [0u32; 16];
        for (slot, row) in x.iter_mut().zip(state.iter()) {
            *slot = row[lane];
        }
        for _ in 0..4 {
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 1, 5, 9, 13);
            quarter_round(&mut x, 2, 6, 10, 14);
            quarter_round(&mut x, 3, 7, 11, 15);
            quarter_round(&mut x, 0, 5, 10, 15);
            quarter_round(&mut x, 1, 6, 11, 12);
            quarter_round(&mut x, 2, 7, 8, 13);
            quarter_round(&mut x, 3, 4, 9, 14);
        }
        for (r, row) in state.iter_mut().enumerate() {
            row[lane] = if (4..12).contains(&r) {
                row[lane].wrapping_add(x[r])
            } else {
                x[r]
            };
        }
    }

    let mut out = [0u64; BUF_LEN];
    for (k, word) in out.iter_mut().enumerate() {
        let lo = state[(2 * k) / 4][(2 * k) % 4];
        let hi = state[(2 * k + 1) / 4][(2 * k + 1) % 4];
        *word = u64::from(lo) | (u64::from(hi) << 32);
    }
    out
}

/// Source of random delays and coin flips.
pub trait RandProvider: Send + Sync {
    /// A random duration in `[min, max)`, or exactly `min` if `min >= max`.
    fn duration(&self, min: Duration, max: Duration) -> Duration;

    /// A random boolean.
    fn boolean(&self) -> bool;
}

/// Shareable [`ChaCha8Stream`] behind a mutex.
///
/// Concurrent callers each get a well-formed draw; the interleaving across
/// callers is unspecified, while a single caller driving a fixed seed sees
/// a reproducible sequence.
#[derive(Debug)]
pub struct ChaCha8Source {
    seed: Seed,
    stream: Mutex<ChaCha8Stream>,
}

impl ChaCha8Source {
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            stream: Mutex::new(ChaCha8Stream::new(seed)),
        }
    }

    /// Source seeded from OS entropy. Use [`ChaCha8Source::seed`] to replay it.
    pub fn from_entropy() -> Self {
        Self::new(Seed::from_entropy())
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut ChaCha8Stream) -> T) -> T {
        // A panic while holding the lock cannot leave the stream invalid.
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stream)
    }
}

impl RandProvider for ChaCha8Source {
    fn duration(&self, min: Duration, max: Duration) -> Duration {
        if min >= max {
            return min;
        }
        self.with_stream(|s| s.duration(min, max))
    }

    fn boolean(&self) -> bool {
        self.with_stream(ChaCha8Stream::boolean)
    }
}
