//! Commit-reveal outcome generation.
//!
//! Before a round opens for betting the engine draws a 32-byte server seed
//! and publishes `sha256(seed_hex)` as the round's commitment. At spin time
//! the outcome is derived by iterating sha256 five times over
//! `seed_hex:client_seed:nonce`, taking the first 8 hex characters of the
//! final digest as a u32 and reducing modulo 37. The revealed seed lets any
//! observer recompute the chain and check it against the commitment, so the
//! exact iteration count and separator are load-bearing.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wheel::{color_of, WheelColor, WheelIndex, WHEEL_SIZE};

/// Client seed used when no player has supplied one for the round.
pub const DEFAULT_CLIENT_SEED: &str = "gem-roulette-v1";

const HASH_ITERATIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum FairnessError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("malformed digest: {0}")]
    MalformedDigest(String),
}

/// A round's winning position together with its color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub index: WheelIndex,
    pub color: WheelColor,
}

impl Outcome {
    pub fn from_index(index: WheelIndex) -> Self {
        Self {
            index,
            color: color_of(index),
        }
    }
}

/// Unrevealed server seed. Held only by the scheduler and wiped from memory
/// on drop; the hex form leaves this struct exactly once, at reveal time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ServerSeed {
    hex: String,
}

impl ServerSeed {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            hex: hex::encode(bytes),
        }
    }

    /// The published commitment: sha256 over the ASCII hex encoding of the
    /// seed, itself hex-encoded.
    pub fn commitment(&self) -> String {
        sha256_hex(self.hex.as_bytes())
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Copy of the seed for publication once the round reaches RESULTS.
    pub fn reveal_hex(&self) -> String {
        self.hex.clone()
    }
}

/// Outcome source seam. The production implementation is [`CommitRevealRng`];
/// tests substitute fixed or failing sources to pin outcomes and to exercise
/// the abort path.
pub trait FairRng: Send + Sync {
    /// Draw a fresh server seed for the next round.
    fn prepare(&self) -> Result<ServerSeed, FairnessError>;

    /// Derive the winning index for a round.
    fn draw(
        &self,
        seed: &ServerSeed,
        client_seed: &str,
        nonce: u64,
    ) -> Result<Outcome, FairnessError>;
}

/// OS-entropy seeds plus the public hash-chain derivation.
pub struct CommitRevealRng;

impl FairRng for CommitRevealRng {
    fn prepare(&self) -> Result<ServerSeed, FairnessError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| FairnessError::Entropy(err.to_string()))?;
        Ok(ServerSeed::from_bytes(bytes))
    }

    fn draw(
        &self,
        seed: &ServerSeed,
        client_seed: &str,
        nonce: u64,
    ) -> Result<Outcome, FairnessError> {
        let digest = outcome_digest(seed.as_hex(), client_seed, nonce);
        let index = outcome_index(&digest)?;
        Ok(Outcome::from_index(index))
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Five chained sha256 passes over `seed_hex:client_seed:nonce`, each pass
/// hashing the previous pass's hex digest.
pub fn outcome_digest(server_seed_hex: &str, client_seed: &str, nonce: u64) -> String {
    let mut digest = sha256_hex(format!("{server_seed_hex}:{client_seed}:{nonce}").as_bytes());
    for _ in 1..HASH_ITERATIONS {
        digest = sha256_hex(digest.as_bytes());
    }
    digest
}

/// First 8 hex characters of the digest as a u32, reduced modulo 37.
pub fn outcome_index(digest: &str) -> Result<WheelIndex, FairnessError> {
    let prefix = digest
        .get(..8)
        .ok_or_else(|| FairnessError::MalformedDigest(digest.to_string()))?;
    let n = u32::from_str_radix(prefix, 16)
        .map_err(|_| FairnessError::MalformedDigest(digest.to_string()))?;
    Ok((n % WHEEL_SIZE as u32) as WheelIndex)
}

/// Check a revealed seed against a previously published commitment.
pub fn verify_commitment(commitment: &str, revealed_seed_hex: &str) -> bool {
    sha256_hex(revealed_seed_hex.as_bytes()) == commitment
}

/// Full third-party verification: commitment matches the revealed seed and
/// the hash chain reproduces the recorded outcome.
pub fn verify_round(
    commitment: &str,
    revealed_seed_hex: &str,
    client_seed: &str,
    nonce: u64,
    outcome: WheelIndex,
) -> bool {
    if !verify_commitment(commitment, revealed_seed_hex) {
        return false;
    }
    let digest = outcome_digest(revealed_seed_hex, client_seed, nonce);
    matches!(outcome_index(&digest), Ok(index) if index == outcome)
}
