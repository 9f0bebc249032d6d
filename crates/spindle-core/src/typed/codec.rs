//! PayloadCodec - payload bytes と Task の相互変換
//!
//! envelope の payload と result store の result はどちらも JSON bytes。

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {task_type}: {source}")]
    Encode {
        task_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {task_type}: {source}")]
    Decode {
        task_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON codec for payloads and results.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<V: Serialize + ?Sized>(task_type: &str, value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|source| CodecError::Encode {
            task_type: task_type.to_string(),
            source,
        })
    }

    pub fn decode<V: DeserializeOwned>(task_type: &str, bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(|source| CodecError::Decode {
            task_type: task_type.to_string(),
            source,
        })
    }

    pub fn encode_task<T: Task>(task: &T) -> Result<Vec<u8>, CodecError> {
        Self::encode(T::TYPE, task)
    }

    pub fn decode_task<T: Task>(bytes: &[u8]) -> Result<T, CodecError> {
        Self::decode(T::TYPE, bytes)
    }

    pub fn encode_output<T: Task>(output: &T::Output) -> Result<Vec<u8>, CodecError> {
        Self::encode(T::TYPE, output)
    }

    /// Decode a stored result back into the task's output type.
    pub fn decode_output<T: Task>(bytes: &[u8]) -> Result<T::Output, CodecError> {
        Self::decode(T::TYPE, bytes)
    }
}
