//! CBOR encoding of operation inputs, outputs and digests.

use crate::error::{OperationError, OperationResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn encode<T: Serialize>(value: &T) -> OperationResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| OperationError::Codec(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> OperationResult<T> {
    ciborium::from_reader(bytes).map_err(|e| OperationError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDigest;

    #[test]
    fn digest_survives_encoding() {
        let digest = ErrorDigest::new(Some("E42".into()), None);
        let bytes = encode(&digest).unwrap();
        assert_eq!(decode::<ErrorDigest>(&bytes).unwrap(), digest);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(
            decode::<ErrorDigest>(&[0xff, 0x00]),
            Err(OperationError::Codec(_))
        ));
    }
}
