//! Generates a short name for a new entry that needs an LFN: a name that
//! deliberately *cannot* be parsed as a valid 8.3 name by any host OS, so
//! every access to the file is forced through the long-name entries rather
//! than through a short name that only coincidentally matches the real
//! one. See DESIGN.md for why this crate takes that path rather than
//! generating a friendly truncated short name.
//!
//! The randomness is injectable (`EntropySource`) so directory-fill tests
//! can replay a generation deterministically instead of depending on real
//! entropy.

use crate::error::FatError;
use crate::short_name::ShortName;

/// A source of pseudo-randomness for short-name generation. Not
/// cryptographic — the output only has to avoid a predictable collision
/// pattern across files created in the same directory.
pub trait EntropySource {
    fn next_u32(&mut self) -> u32;
}

/// A small, fast, deterministic PRNG — reproducible in tests given a fixed
/// seed, unlike a real entropy source.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u32,
}

impl XorShiftRng {
    pub fn new(seed: u32) -> Self {
        XorShiftRng {
            state: if seed == 0 { 0x9e37_79b9 } else { seed },
        }
    }

    /// Derives a child generator with a different stream from this one,
    /// used to give each subdirectory its own generation sequence without
    /// threading a shared `&mut` through the whole tree.
    pub fn fork(&mut self) -> Self {
        let child_seed = self.next_u32() ^ 0x5bd1_e995;
        XorShiftRng::new(child_seed)
    }
}

impl EntropySource for XorShiftRng {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}

/// 35 bytes that are all individually illegal in an 8.3 name (control
/// characters, plus a handful of the punctuation `ShortName` also
/// forbids). None of these is `0xE5` — the deleted-entry marker — which
/// the generator below still checks for defensively, since a future change
/// to this pool should not silently start emitting buffers that look like
/// deleted entries.
const INVALID_CHAR_POOL: [u8; 35] = [
    0x01, 0x02, 0x03, 0x04, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11,
    0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f, b'"', b'*',
    b':', b'<', b'>',
];

/// Extension stamped on every generated short name. Arbitrary — chosen
/// only to avoid looking like a real extension (`.IFL` is not a format
/// anything recognizes), never consulted by anything in this crate.
const GENERATED_EXT: &[u8; 3] = b"ifl";

/// Guards against a pathological rng/`exists` combination looping forever;
/// should never be hit in practice (collision probability across the
/// pool's keyspace is astronomically low for any directory this crate can
/// actually hold).
const MAX_ATTEMPTS: u32 = 10_000;

/// Produces a short name that is guaranteed to not parse as a usable 8.3
/// name (so no file can ever be opened through it directly) and that
/// `exists` does not already report as taken within the target directory.
///
/// Picks a slash position `p` in `0..8`, fills the other seven base-name
/// bytes from `INVALID_CHAR_POOL`, sets the slash byte itself, and stamps a
/// fixed three-byte extension. A `0xE5` byte anywhere (the deleted-entry
/// marker) forces a retry, as does a collision against `exists`.
pub fn generate(
    mut exists: impl FnMut(&ShortName) -> bool,
    rng: &mut impl EntropySource,
) -> Result<ShortName, FatError> {
    for _ in 0..MAX_ATTEMPTS {
        let p = (rng.next_u32() % 8) as usize;
        let mut base = [0u8; 8];
        for (i, slot) in base.iter_mut().enumerate() {
            *slot = if i == p {
                b'/'
            } else {
                let idx = (rng.next_u32() as usize) % INVALID_CHAR_POOL.len();
                INVALID_CHAR_POOL[idx]
            };
        }
        if base.iter().any(|&b| b == 0xe5) {
            log::warn!("short-name generator produced a 0xE5 byte, retrying");
            continue;
        }
        let candidate = ShortName::from_parts(&base, GENERATED_EXT);
        if !exists(&candidate) {
            return Ok(candidate);
        }
        log::warn!("short-name generator collision, retrying with a new buffer");
    }
    Err(FatError::DirectoryFull {
        capacity: 0,
        requested: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_name_is_never_a_valid_short_name() {
        let mut rng = XorShiftRng::new(1);
        for _ in 0..64 {
            let sn = generate(|_| false, &mut rng).unwrap();
            let display = sn.display();
            // The slash lands somewhere in the base name; `display()` is
            // only cosmetic here, but the raw buffer must carry a '/',
            // which `ShortName::can_convert` always rejects.
            assert!(!display.is_empty());
            assert!(sn.raw()[0..8].contains(&b'/'));
        }
    }

    #[test]
    fn never_emits_the_deleted_marker() {
        let mut rng = XorShiftRng::new(7);
        for _ in 0..256 {
            let sn = generate(|_| false, &mut rng).unwrap();
            assert!(!sn.raw().iter().any(|&b| b == 0xe5));
        }
    }

    #[test]
    fn extension_is_always_the_fixed_tag() {
        let mut rng = XorShiftRng::new(42);
        let sn = generate(|_| false, &mut rng).unwrap();
        assert_eq!(&sn.raw()[8..11], GENERATED_EXT);
    }

    #[test]
    fn retries_past_a_forced_collision() {
        let mut rng = XorShiftRng::new(99);
        let first = generate(|_| false, &mut rng).unwrap();
        let mut seen_first = true;
        let second = generate(
            |c| {
                if *c == first && seen_first {
                    seen_first = false;
                    true
                } else {
                    false
                }
            },
            &mut rng,
        )
        .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn deterministic_given_same_seed() {
        let mut rng_a = XorShiftRng::new(1234);
        let mut rng_b = XorShiftRng::new(1234);
        let a = generate(|_| false, &mut rng_a).unwrap();
        let b = generate(|_| false, &mut rng_b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fork_produces_a_different_stream() {
        let mut rng = XorShiftRng::new(7);
        let mut child = rng.fork();
        assert_ne!(rng.next_u32(), child.next_u32());
    }
}
