//! Commit-reveal hashing, composed the way the contract verifies reveals:
//! `keccak256(uint256 guess ‖ keccak256(uint256 salt))`.

use crate::{
    Error,
    Result,
    U256,
};
use ethers::utils::keccak256;
use std::str::FromStr;

pub const MAX_GUESS: u64 = 1000;

fn uint256_be(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

pub fn hash_salt(salt: U256) -> [u8; 32] {
    keccak256(uint256_be(salt))
}

pub fn commitment(guess: U256, salt: U256) -> [u8; 32] {
    let mut packed = [0u8; 64];
    packed[..32].copy_from_slice(&uint256_be(guess));
    packed[32..].copy_from_slice(&hash_salt(salt));
    keccak256(packed)
}

pub fn verifies(commitment_hash: &[u8; 32], guess: U256, salt: U256) -> bool {
    commitment(guess, salt) == *commitment_hash
}

/// A guess and its salt as typed by the player, already range-checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GuessInput {
    pub guess: U256,
    pub salt: U256,
}

impl GuessInput {
    pub fn new(guess: u64, salt: U256) -> Result<Self> {
        if guess > MAX_GUESS {
            return Err(Error::validation(format!(
                "Guess value must be a digit between 0 and {MAX_GUESS}"
            )));
        }
        Ok(Self {
            guess: U256::from(guess),
            salt,
        })
    }

    pub fn parse(guess: &str, salt: &str) -> Result<Self> {
        let guess = guess.trim();
        let parsed_guess = u64::from_str(guess).map_err(|_| {
            Error::validation(format!(
                "Guess value must be a digit between 0 and {MAX_GUESS}"
            ))
        })?;
        let salt = salt.trim();
        if salt.is_empty() {
            return Err(Error::validation("Salt must not be empty"));
        }
        let parsed_salt = U256::from_dec_str(salt).map_err(|_| {
            Error::validation("Salt must be a non-negative whole number")
        })?;
        Self::new(parsed_guess, parsed_salt)
    }

    pub fn commitment(&self) -> [u8; 32] {
        commitment(self.guess, self.salt)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn commitment__same_guess_and_salt__verifies_at_reveal() {
        // given
        let submitted = GuessInput::parse("512", "98765").unwrap();
        let hash = submitted.commitment();

        // when
        let revealed = GuessInput::parse(" 512 ", "98765").unwrap();

        // then
        assert!(verifies(&hash, revealed.guess, revealed.salt));
    }

    #[test]
    fn commitment__different_salt__does_not_verify() {
        let hash = commitment(U256::from(3u64), U256::from(11u64));
        assert!(!verifies(&hash, U256::from(3u64), U256::from(12u64)));
    }

    #[test]
    fn commitment__hashes_salt_before_pairing() {
        // given
        let guess = U256::from(3u64);
        let salt = U256::from(11u64);
        let mut naive = [0u8; 64];
        guess.to_big_endian(&mut naive[..32]);
        salt.to_big_endian(&mut naive[32..]);

        // then
        assert_ne!(commitment(guess, salt), keccak256(naive));
    }

    #[test]
    fn hash_salt__matches_keccak_of_zero_word() {
        // keccak256 of 32 zero bytes
        let expected = hex::decode(
            "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563",
        )
        .unwrap();
        assert_eq!(hash_salt(U256::zero()).to_vec(), expected);
    }

    #[test]
    fn parse__guess_above_range__is_validation_error() {
        let result = GuessInput::parse("1001", "1");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn parse__negative_guess__is_validation_error() {
        let result = GuessInput::parse("-1", "1");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn parse__bounds_are_inclusive() {
        assert!(GuessInput::parse("0", "1").is_ok());
        assert!(GuessInput::parse("1000", "1").is_ok());
    }

    #[test]
    fn parse__empty_salt__is_validation_error() {
        let result = GuessInput::parse("10", "  ");
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
