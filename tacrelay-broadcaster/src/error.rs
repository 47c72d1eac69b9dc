use thiserror::Error;

use crate::client::ClientId;

#[derive(Error, Debug)]
pub enum BroadcasterError {
    #[error("client {0} is already registered")]
    DuplicateClient(ClientId),
}

pub type Result<T> = std::result::Result<T, BroadcasterError>;
