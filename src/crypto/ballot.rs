//! Ballot Codec
//!
//! Packs a vote into a 3-byte field and hides it from everyone but the
//! tally authority. Two encryption paths decode to the same plaintext:
//!
//! - trusted-party ballots: 3-byte XOR keystream from an ECDH session key
//! - participant ballots: sealed 129-byte ciphertext under an ephemeral
//!   secp256k1 key (65-byte SEC1 point, 32-byte masked block, 32-byte tag)
//!
//! The codec hides content only. Double-vote prevention and eligibility
//! are enforced by the external circuit via nullifiers and membership.

use k256::ecdh::{diffie_hellman, EphemeralSecret};
use k256::elliptic_curve::rand_core::CryptoRngCore;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hash::DomainHasher;
use crate::crypto::merkle::MembershipProof;

/// Largest encodable target index (7 bits, capped at two decimal digits).
pub const MAX_TARGET: u8 = 99;

/// Largest encodable round number.
pub const MAX_ROUND: u8 = 99;

/// Largest encodable blinding salt (10 bits).
pub const MAX_SALT: u16 = 999;

/// Packed vote payload length.
pub const PACKED_LEN: usize = 3;

/// Sealed participant ballot length: 65-byte ephemeral point,
/// 32-byte masked payload block, 32-byte authentication tag.
pub const SEALED_LEN: usize = 129;

const SESSION_KEY_DOMAIN: &[u8] = b"MOONHOWL_SESSION_KEY_V1";
const SEAL_KEY_DOMAIN: &[u8] = b"MOONHOWL_SEAL_KEY_V1";
const SEAL_TAG_DOMAIN: &[u8] = b"MOONHOWL_SEAL_TAG_V1";

/// Errors from packing and ballot decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    /// A plaintext field exceeds its bit-packed range.
    #[error("ballot field {field} = {value} exceeds max {max}")]
    EncodingOverflow {
        /// Which field overflowed.
        field: &'static str,
        /// Offending value.
        value: u16,
        /// Largest encodable value.
        max: u16,
    },

    /// Ciphertext is not the fixed sealed length.
    #[error("malformed ciphertext: expected {expected} bytes, got {actual}")]
    MalformedCiphertext {
        /// Required length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },

    /// Ephemeral key bytes do not decode to a curve point.
    #[error("ephemeral key is not a valid secp256k1 point")]
    InvalidEphemeralKey,

    /// Authentication tag does not match; wrong key or tampered ballot.
    #[error("authentication tag mismatch")]
    AuthTagMismatch,
}

/// Decoded vote payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotPlaintext {
    /// Voted-for player index.
    pub target: u8,
    /// Round the vote belongs to.
    pub round: u8,
    /// Blinding salt so equal votes never produce equal plaintexts.
    pub salt: u16,
}

/// Pack (target, round, salt) into 3 bytes, big-endian.
///
/// Layout: target in the high 7 bits, round in the middle 7,
/// salt in the low 10. Caps the game at 100 players and 100 rounds.
pub fn pack(plaintext: &BallotPlaintext) -> Result<[u8; PACKED_LEN], BallotError> {
    if plaintext.target > MAX_TARGET {
        return Err(BallotError::EncodingOverflow {
            field: "target",
            value: plaintext.target as u16,
            max: MAX_TARGET as u16,
        });
    }
    if plaintext.round > MAX_ROUND {
        return Err(BallotError::EncodingOverflow {
            field: "round",
            value: plaintext.round as u16,
            max: MAX_ROUND as u16,
        });
    }
    if plaintext.salt > MAX_SALT {
        return Err(BallotError::EncodingOverflow {
            field: "salt",
            value: plaintext.salt,
            max: MAX_SALT,
        });
    }

    let packed =
        ((plaintext.target as u32) << 17) | ((plaintext.round as u32) << 10) | plaintext.salt as u32;
    Ok([(packed >> 16) as u8, (packed >> 8) as u8, packed as u8])
}

/// Inverse of [`pack`]. Total on all 3-byte inputs.
pub fn unpack(bytes: [u8; PACKED_LEN]) -> BallotPlaintext {
    let packed = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    BallotPlaintext {
        target: ((packed >> 17) & 0x7f) as u8,
        round: ((packed >> 10) & 0x7f) as u8,
        salt: (packed & 0x3ff) as u16,
    }
}

/// Derive the 3-byte session key for trusted-party ballots.
///
/// ECDH shared secret mixed with the round number under a domain tag,
/// truncated to the packed payload width. Symmetric: either side of
/// the key exchange derives the same key.
pub fn derive_session_key(secret: &SecretKey, counterparty: &PublicKey, round: u8) -> [u8; 3] {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), counterparty.as_affine());

    let mut hasher = DomainHasher::new(SESSION_KEY_DOMAIN);
    hasher.update_bytes(shared.raw_secret_bytes().as_slice());
    hasher.update_u8(round);
    let digest = hasher.finalize();

    [digest[0], digest[1], digest[2]]
}

/// XOR a packed payload with a session keystream.
///
/// Involutive: applying it twice with the same key round-trips, so this
/// is both the trusted-party encrypt and decrypt.
pub fn xor_keystream(packed: [u8; PACKED_LEN], key: [u8; 3]) -> [u8; PACKED_LEN] {
    [packed[0] ^ key[0], packed[1] ^ key[1], packed[2] ^ key[2]]
}

/// Seal a participant ballot for the tally authority.
///
/// Fresh ephemeral key per ballot; output is always [`SEALED_LEN`] bytes.
pub fn seal(
    plaintext: &BallotPlaintext,
    recipient: &PublicKey,
    rng: &mut impl CryptoRngCore,
) -> Result<[u8; SEALED_LEN], BallotError> {
    let packed = pack(plaintext)?;

    let ephemeral = EphemeralSecret::random(rng);
    let ephemeral_pub = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(recipient);

    let keystream = {
        let mut hasher = DomainHasher::new(SEAL_KEY_DOMAIN);
        hasher.update_bytes(shared.raw_secret_bytes().as_slice());
        hasher.update_bytes(ephemeral_pub.as_bytes());
        hasher.finalize()
    };

    // Payload sits in the first 3 bytes of a zero-padded 32-byte block
    let mut masked = keystream;
    masked[0] ^= packed[0];
    masked[1] ^= packed[1];
    masked[2] ^= packed[2];

    let tag = {
        let mut hasher = DomainHasher::new(SEAL_TAG_DOMAIN);
        hasher.update_bytes(shared.raw_secret_bytes().as_slice());
        hasher.update_bytes(ephemeral_pub.as_bytes());
        hasher.update_bytes(&masked);
        hasher.finalize()
    };

    let mut out = [0u8; SEALED_LEN];
    out[..65].copy_from_slice(ephemeral_pub.as_bytes());
    out[65..97].copy_from_slice(&masked);
    out[97..].copy_from_slice(&tag);
    Ok(out)
}

/// Open a sealed ballot with the tally private key.
///
/// Any failure here is reported, never panicked on - callers treat an
/// unopenable ballot as an abstention.
pub fn open(ciphertext: &[u8], secret: &SecretKey) -> Result<BallotPlaintext, BallotError> {
    if ciphertext.len() != SEALED_LEN {
        return Err(BallotError::MalformedCiphertext {
            expected: SEALED_LEN,
            actual: ciphertext.len(),
        });
    }

    let ephemeral_pub = PublicKey::from_sec1_bytes(&ciphertext[..65])
        .map_err(|_| BallotError::InvalidEphemeralKey)?;
    let masked = &ciphertext[65..97];
    let tag = &ciphertext[97..];

    let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral_pub.as_affine());
    let ephemeral_bytes = ephemeral_pub.to_encoded_point(false);

    let expected_tag = {
        let mut hasher = DomainHasher::new(SEAL_TAG_DOMAIN);
        hasher.update_bytes(shared.raw_secret_bytes().as_slice());
        hasher.update_bytes(ephemeral_bytes.as_bytes());
        hasher.update_bytes(masked);
        hasher.finalize()
    };
    if expected_tag[..] != *tag {
        return Err(BallotError::AuthTagMismatch);
    }

    let keystream = {
        let mut hasher = DomainHasher::new(SEAL_KEY_DOMAIN);
        hasher.update_bytes(shared.raw_secret_bytes().as_slice());
        hasher.update_bytes(ephemeral_bytes.as_bytes());
        hasher.finalize()
    };

    Ok(unpack([
        masked[0] ^ keystream[0],
        masked[1] ^ keystream[1],
        masked[2] ^ keystream[2],
    ]))
}

/// What a voter hands off after [`crate::engine::Coordinator::submit_ballot`]:
/// the sealed ciphertext plus the roster membership proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedBallot {
    /// Sealed ballot bytes ([`SEALED_LEN`] for participant ballots).
    pub ciphertext: Vec<u8>,
    /// Membership proof for the voter's roster slot.
    pub proof: MembershipProof,
}

impl SubmittedBallot {
    /// Binary encoding for handoff to the prover.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode a prover handoff blob.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keypair() -> (SecretKey, PublicKey) {
        let secret = SecretKey::random(&mut rand::thread_rng());
        let public = secret.public_key();
        (secret, public)
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let plaintext = BallotPlaintext {
            target: 42,
            round: 7,
            salt: 513,
        };
        assert_eq!(unpack(pack(&plaintext).unwrap()), plaintext);
    }

    #[test]
    fn test_pack_boundaries() {
        let max = BallotPlaintext {
            target: 99,
            round: 99,
            salt: 999,
        };
        assert_eq!(unpack(pack(&max).unwrap()), max);

        let zero = BallotPlaintext {
            target: 0,
            round: 0,
            salt: 0,
        };
        assert_eq!(pack(&zero).unwrap(), [0, 0, 0]);
    }

    #[test]
    fn test_pack_overflow() {
        let overflow = |target, round, salt| {
            pack(&BallotPlaintext {
                target,
                round,
                salt,
            })
        };

        assert!(matches!(
            overflow(100, 0, 0),
            Err(BallotError::EncodingOverflow {
                field: "target",
                ..
            })
        ));
        assert!(matches!(
            overflow(0, 100, 0),
            Err(BallotError::EncodingOverflow { field: "round", .. })
        ));
        assert!(matches!(
            overflow(0, 0, 1000),
            Err(BallotError::EncodingOverflow { field: "salt", .. })
        ));
    }

    #[test]
    fn test_session_key_agreement() {
        let (tally_secret, tally_pub) = keypair();
        let (party_secret, party_pub) = keypair();

        let k1 = derive_session_key(&tally_secret, &party_pub, 3);
        let k2 = derive_session_key(&party_secret, &tally_pub, 3);
        assert_eq!(k1, k2);

        // Round number separates keystreams
        let k3 = derive_session_key(&tally_secret, &party_pub, 4);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_trusted_party_roundtrip() {
        let (tally_secret, tally_pub) = keypair();
        let (party_secret, party_pub) = keypair();

        let plaintext = BallotPlaintext {
            target: 5,
            round: 2,
            salt: 111,
        };
        let packed = pack(&plaintext).unwrap();

        let ct = xor_keystream(packed, derive_session_key(&party_secret, &tally_pub, 2));
        let pt = xor_keystream(ct, derive_session_key(&tally_secret, &party_pub, 2));
        assert_eq!(unpack(pt), plaintext);
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (tally_secret, tally_pub) = keypair();
        let plaintext = BallotPlaintext {
            target: 17,
            round: 4,
            salt: 900,
        };

        let ct = seal(&plaintext, &tally_pub, &mut rand::thread_rng()).unwrap();
        assert_eq!(ct.len(), SEALED_LEN);
        assert_eq!(open(&ct, &tally_secret).unwrap(), plaintext);
    }

    #[test]
    fn test_seal_is_randomized() {
        let (_, tally_pub) = keypair();
        let plaintext = BallotPlaintext {
            target: 1,
            round: 1,
            salt: 1,
        };

        let ct1 = seal(&plaintext, &tally_pub, &mut rand::thread_rng()).unwrap();
        let ct2 = seal(&plaintext, &tally_pub, &mut rand::thread_rng()).unwrap();
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_open_rejects_bad_length() {
        let (tally_secret, _) = keypair();
        assert_eq!(
            open(&[0u8; 64], &tally_secret),
            Err(BallotError::MalformedCiphertext {
                expected: SEALED_LEN,
                actual: 64
            })
        );
    }

    #[test]
    fn test_open_rejects_tampering() {
        let (tally_secret, tally_pub) = keypair();
        let plaintext = BallotPlaintext {
            target: 9,
            round: 9,
            salt: 9,
        };

        let mut ct = seal(&plaintext, &tally_pub, &mut rand::thread_rng()).unwrap();
        ct[70] ^= 0x01;
        assert_eq!(open(&ct, &tally_secret), Err(BallotError::AuthTagMismatch));
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let (_, tally_pub) = keypair();
        let (other_secret, _) = keypair();

        let ct = seal(
            &BallotPlaintext {
                target: 3,
                round: 1,
                salt: 42,
            },
            &tally_pub,
            &mut rand::thread_rng(),
        )
        .unwrap();
        assert_eq!(open(&ct, &other_secret), Err(BallotError::AuthTagMismatch));
    }

    #[test]
    fn test_submitted_ballot_encoding() {
        use crate::crypto::merkle::MembershipTree;

        let tree = MembershipTree::build(&[b"a", b"b", b"c"], 3).unwrap();
        let ballot = SubmittedBallot {
            ciphertext: vec![7u8; SEALED_LEN],
            proof: tree.proof(1).unwrap(),
        };

        let bytes = ballot.encode().unwrap();
        assert_eq!(SubmittedBallot::decode(&bytes).unwrap(), ballot);
    }

    proptest! {
        #[test]
        fn prop_pack_unpack(target in 0u8..=99, round in 0u8..=99, salt in 0u16..=999) {
            let plaintext = BallotPlaintext { target, round, salt };
            prop_assert_eq!(unpack(pack(&plaintext).unwrap()), plaintext);
        }
    }
}
