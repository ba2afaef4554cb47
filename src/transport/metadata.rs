use rpcmux_lite::Metadata;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
    KeyAndValueRef, MetadataMap,
};
use tracing::warn;

/// Convert response headers or trailers into call metadata.
///
/// Binary (`-bin`) entries keep their base64 wire form.
pub fn from_tonic(map: &MetadataMap) -> Metadata {
    let mut metadata = Metadata::new();
    for entry in map.iter() {
        match entry {
            KeyAndValueRef::Ascii(key, value) => match value.to_str() {
                Ok(value) => {
                    metadata.insert(key.as_str().to_owned(), value.to_owned());
                }
                Err(_) => warn!(key = %key.as_str(), "Skipping non-visible metadata value"),
            },
            KeyAndValueRef::Binary(key, value) => {
                let encoded = String::from_utf8_lossy(value.as_encoded_bytes()).into_owned();
                metadata.insert(key.as_str().to_owned(), encoded);
            }
        }
    }
    metadata
}

/// Copy request metadata onto an outgoing request. Invalid entries are skipped.
pub fn apply_to_tonic(metadata: &Metadata, target: &mut MetadataMap) {
    for (key, value) in metadata {
        if key.ends_with("-bin") {
            match BinaryMetadataKey::from_bytes(key.as_bytes()) {
                Ok(key) => {
                    target.insert_bin(key, BinaryMetadataValue::from_bytes(value.as_bytes()));
                }
                Err(_) => warn!(key = %key, "Skipping invalid binary metadata key"),
            }
            continue;
        }

        let Ok(ascii_key) = AsciiMetadataKey::from_bytes(key.as_bytes()) else {
            warn!(key = %key, "Skipping invalid metadata key");
            continue;
        };
        match value.parse::<AsciiMetadataValue>() {
            Ok(value) => {
                target.insert(ascii_key, value);
            }
            Err(_) => warn!(key = %key, "Skipping invalid metadata value"),
        }
    }
}
