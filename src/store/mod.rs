pub mod sqlite;

pub use sqlite::TokenStore;

use thiserror::Error;

use crate::crypto::CipherError;

/// Storage failures. The store never retries internally; the caller (the
/// lifecycle manager, the scheduler, or the HTTP boundary) decides what a
/// failed operation means.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error(transparent)]
    Crypto(#[from] CipherError),
}
