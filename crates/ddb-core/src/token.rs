//! Share-link token issuer.
//!
//! Tokens come from an alphabet with visually ambiguous characters
//! removed (no `I`, `O`, `l`, `0`, `1`). Collisions are retried against
//! the store a bounded number of times; running out of retries is fatal.

use rand::Rng;

use crate::{store::Store, Error, Result};

pub const TOKEN_LENGTH: usize = 14;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const MAX_COLLISION_RETRIES: usize = 20;

pub fn random_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Generate a token not yet present in `share_links`.
pub fn issue_unique_token(store: &Store) -> Result<String> {
    issue_unique_token_with(store, || random_token(TOKEN_LENGTH))
}

/// Same as [`issue_unique_token`] with an injectable generator, so the
/// retry bound is testable without probabilistic collisions.
pub fn issue_unique_token_with(store: &Store, mut gen: impl FnMut() -> String) -> Result<String> {
    for _ in 0..MAX_COLLISION_RETRIES {
        let token = gen();
        if store.share_link_by_token(&token)?.is_none() {
            return Ok(token);
        }
    }

    Err(Error::TokenSpaceExhausted {
        attempts: MAX_COLLISION_RETRIES,
    })
}
