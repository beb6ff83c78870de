//! Row differences and keyless cardinality handling

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Kind of change between two versions of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One changed row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difference {
    pub change: ChangeType,
    pub key: Bytes,
    /// Value before the change (`None` for additions)
    pub old_value: Option<Bytes>,
    /// Value after the change (`None` for removals)
    pub new_value: Option<Bytes>,
}

impl Difference {
    pub fn added(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            change: ChangeType::Added,
            key: key.into(),
            old_value: None,
            new_value: Some(value.into()),
        }
    }

    pub fn removed(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            change: ChangeType::Removed,
            key: key.into(),
            old_value: Some(value.into()),
            new_value: None,
        }
    }

    pub fn modified(
        key: impl Into<Bytes>,
        old_value: impl Into<Bytes>,
        new_value: impl Into<Bytes>,
    ) -> Self {
        Self {
            change: ChangeType::Modified,
            key: key.into(),
            old_value: Some(old_value.into()),
            new_value: Some(new_value.into()),
        }
    }
}

/// Value stored for a row of a keyless table: the row payload and how many
/// identical copies of it exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeylessRow {
    pub cardinality: u64,
    pub payload: Vec<u8>,
}

impl KeylessRow {
    pub fn new(cardinality: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            cardinality,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Report how many copies of a keyless row a difference stands for, turning
/// a modification into an addition or removal of the cardinality delta.
///
/// A modification that leaves the cardinality unchanged cannot happen for
/// keyless rows and is reported as an error.
pub fn convert_diff(mut diff: Difference) -> Result<(Difference, u64)> {
    let old = cardinality_of(diff.old_value.as_deref())?;
    let new = cardinality_of(diff.new_value.as_deref())?;

    match diff.change {
        ChangeType::Removed => {
            let count = old.ok_or_else(|| missing_value(&diff, "old"))?;
            Ok((diff, count))
        }
        ChangeType::Added => {
            let count = new.ok_or_else(|| missing_value(&diff, "new"))?;
            Ok((diff, count))
        }
        ChangeType::Modified => {
            let old = old.unwrap_or(0);
            let new = new.unwrap_or(0);

            if new > old {
                diff.change = ChangeType::Added;
                diff.old_value = None;
                Ok((diff, new - old))
            } else if new < old {
                diff.change = ChangeType::Removed;
                diff.new_value = None;
                Ok((diff, old - new))
            } else {
                Err(StoreError::DeltaInvariantViolation(hex::encode(&diff.key)))
            }
        }
    }
}

fn cardinality_of(value: Option<&[u8]>) -> Result<Option<u64>> {
    value
        .map(|bytes| KeylessRow::decode(bytes).map(|row| row.cardinality))
        .transpose()
}

fn missing_value(diff: &Difference, which: &str) -> StoreError {
    StoreError::UnexpectedChange(format!(
        "{:?} difference without {} value for key: {}",
        diff.change,
        which,
        hex::encode(&diff.key)
    ))
}
