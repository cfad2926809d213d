use crate::state::State;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageError {
    Encode(String),
    Decode(String),
    /// The decoded state does not satisfy the ledger invariants.
    Corrupted(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Encode(msg) => write!(f, "failed to encode state: {msg}"),
            StorageError::Decode(msg) => write!(f, "failed to decode state: {msg}"),
            StorageError::Corrupted(msg) => write!(f, "decoded state is inconsistent: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

pub fn encode_state(state: &State) -> Result<Vec<u8>, StorageError> {
    let mut buf = vec![];
    ciborium::ser::into_writer(state, &mut buf)
        .map_err(|e| StorageError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode_state(bytes: &[u8]) -> Result<State, StorageError> {
    let state: State =
        ciborium::de::from_reader(bytes).map_err(|e| StorageError::Decode(e.to_string()))?;
    state.check_invariants().map_err(StorageError::Corrupted)?;
    Ok(state)
}
