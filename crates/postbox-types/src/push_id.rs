//! Chronologically sortable entry keys.
//!
//! A push id is 20 characters: 8 encode the millisecond timestamp, 12 are
//! random. Ids minted within the same millisecond reuse the previous random
//! part incremented by one, so ids from one generator always sort in the
//! order they were created.

use rand::Rng;

const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

pub const PUSH_ID_LEN: usize = TIME_CHARS + RANDOM_CHARS;

#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_ms: u64,
    last_random: [u8; RANDOM_CHARS],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id using the current wall clock.
    pub fn generate(&mut self) -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.generate_at(now)
    }

    /// Mint an id for the given millisecond timestamp. A clock that steps
    /// backwards is treated as the last seen millisecond.
    pub fn generate_at(&mut self, now_ms: u64) -> String {
        let now = now_ms.max(self.last_ms);

        if now == self.last_ms && self.last_ms != 0 {
            for digit in self.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::rng();
            for digit in &mut self.last_random {
                *digit = rng.random_range(0..64);
            }
        }
        self.last_ms = now;

        let mut id = [0u8; PUSH_ID_LEN];
        let mut ts = now;
        for slot in id[..TIME_CHARS].iter_mut().rev() {
            *slot = ALPHABET[(ts % 64) as usize];
            ts /= 64;
        }
        for (slot, digit) in id[TIME_CHARS..].iter_mut().zip(self.last_random) {
            *slot = ALPHABET[digit as usize];
        }

        id.iter().map(|&b| b as char).collect()
    }
}
