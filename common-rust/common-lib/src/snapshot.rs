use serde::{de, Serialize};
use thiserror::Error;

pub const SERIALIZATION_VERSION_V1: u8 = 1u8;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("empty snapshot")]
    Empty,
    #[error("unsupported serialization version: {0}")]
    UnsupportedVersion(u8),
    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn serialize<T>(value: &T) -> Result<Vec<u8>, SnapshotError>
where
    T: ?Sized + Serialize,
{
    let data = serde_json::to_vec(value)?;

    let mut result = Vec::with_capacity(data.len() + 1);
    result.push(SERIALIZATION_VERSION_V1);
    result.extend(data);

    Ok(result)
}

/// Decodes a snapshot written by [`serialize`].
///
/// Payloads written before the version byte existed are plain JSON documents;
/// those are recognised by their leading `[` or `{` and read as-is.
pub fn deserialize<'a, T>(bytes: &'a [u8]) -> Result<T, SnapshotError>
where
    T: de::Deserialize<'a>,
{
    let Some((version, data)) = bytes.split_first() else {
        return Err(SnapshotError::Empty);
    };

    match *version {
        SERIALIZATION_VERSION_V1 => Ok(serde_json::from_slice(data)?),
        b'[' | b'{' => Ok(serde_json::from_slice(bytes)?),
        other => Err(SnapshotError::UnsupportedVersion(other)),
    }
}
