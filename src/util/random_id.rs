use rand::Rng;

/// Characters that cannot be mistaken for one another when read aloud or copied by hand.
pub const UNMISTAKABLE_CHARS: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTWXYZabcdefghijkmnopqrstuvwxyz";

/// Default length of generated document identifiers.
pub const DEFAULT_ID_LENGTH: usize = 17;

/// Source of fresh document identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Draws every character uniformly from [`UNMISTAKABLE_CHARS`] using the thread-local
/// cryptographically secure RNG.
pub struct RandomIdGenerator {
    length: usize,
}

impl RandomIdGenerator {
    pub fn new(length: usize) -> Self {
        RandomIdGenerator { length }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        RandomIdGenerator::new(DEFAULT_ID_LENGTH)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| UNMISTAKABLE_CHARS[rng.gen_range(0..UNMISTAKABLE_CHARS.len())] as char)
            .collect()
    }
}

/// Returns `true` if `id` could have been produced by a [`RandomIdGenerator`] of the given length.
pub fn is_random_id(id: &str, length: usize) -> bool {
    id.len() == length && id.bytes().all(|b| UNMISTAKABLE_CHARS.contains(&b))
}
