//! Crate-wide error aggregate.

use thiserror::Error;

use crate::{cipher, envelope, event, keys, pool};

/// Any error this crate can surface
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Keys(#[from] keys::Error),

    #[error(transparent)]
    Event(#[from] event::Error),

    #[error(transparent)]
    Cipher(#[from] cipher::Error),

    #[error(transparent)]
    Envelope(#[from] envelope::Error),

    #[error(transparent)]
    Publish(#[from] pool::PublishError),
}

pub type Result<T> = std::result::Result<T, Error>;
