use chrono::{DateTime, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tombola_core::{LotteryId, UserId, VerificationRecord};

/// 32-bit draw seed: SHA-256 over the draw inputs, read as a big-endian
/// integer and reduced modulo 2^32.
pub fn derive_seed(
    timestamp: &str,
    lottery_id: LotteryId,
    end_time: DateTime<Utc>,
    candidate_count: usize,
) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}-{}-{}-{}",
            timestamp,
            lottery_id,
            end_time.timestamp(),
            candidate_count
        )
        .as_bytes(),
    );
    let digest = hasher.finalize();

    // mod 2^32 of a big-endian number keeps only its last four bytes
    let mut tail = [0u8; 4];
    tail.copy_from_slice(&digest[digest.len() - 4..]);
    u32::from_be_bytes(tail)
}

/// Keystream for a draw: ChaCha20 keyed with the seed as four big-endian
/// bytes followed by 28 zero bytes, nonce and block counter starting at 0.
pub fn draw_rng(seed: u32) -> ChaCha20Rng {
    let mut key = [0u8; 32];
    key[..4].copy_from_slice(&seed.to_be_bytes());
    ChaCha20Rng::from_seed(key)
}

/// Uniform index in `0..=max`: 64-bit outputs at or above the largest
/// multiple of `max + 1` are rejected, the rest are reduced modulo `max + 1`.
fn index_up_to(rng: &mut ChaCha20Rng, max: u64) -> u64 {
    let span = max.saturating_add(1);
    let limit = u64::MAX - u64::MAX % span;
    loop {
        let value = rng.next_u64();
        if value < limit {
            return value % span;
        }
    }
}

/// In-place Fisher-Yates shuffle driven by `seed`. Same seed and same input
/// order always give the same permutation, independent of the `rand`
/// version or the platform.
pub fn fisher_yates<T>(items: &mut [T], seed: u32) {
    let mut rng = draw_rng(seed);
    for i in (1..items.len()).rev() {
        let j = index_up_to(&mut rng, i as u64) as usize;
        items.swap(i, j);
    }
}

/// Per-winner hash binding a position to the published verification record.
pub fn verification_hash(
    record: &VerificationRecord,
    position: u32,
    user_id: UserId,
) -> Result<String, serde_json::Error> {
    let record_json = serde_json::to_string(record)?;

    let mut hasher = Sha256::new();
    hasher.update(record_json.as_bytes());
    hasher.update(format!(":{}:{}", position, user_id).as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
