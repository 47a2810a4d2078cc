//! JSON transport codec.
//!
//! Byte payloads travel as standard base64 strings. `stdin` keeps the
//! difference between absent (`null`) and empty (`""`).

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;
use crate::{CallResult, Command};

/// Content type of encoded requests and successful responses.
pub const CONTENT_TYPE: &str = "application/json";

pub fn encode_command(command: &Command) -> Result<Vec<u8>, CodecError> {
    encode("command", command)
}

pub fn decode_command(bytes: &[u8]) -> Result<Command, CodecError> {
    decode("command", bytes)
}

pub fn encode_result(result: &CallResult) -> Result<Vec<u8>, CodecError> {
    encode("result", result)
}

pub fn decode_result(bytes: &[u8]) -> Result<CallResult, CodecError> {
    decode("result", bytes)
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|source| CodecError::Encode { what, source })
}

fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|source| CodecError::Decode { what, source })
}

pub(crate) mod base64_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

pub(crate) mod base64_map {
    use std::collections::BTreeMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        files: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(files.iter().map(|(name, data)| (name, STANDARD.encode(data))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, encoded)| {
                STANDARD
                    .decode(encoded)
                    .map(|data| (name, data))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
