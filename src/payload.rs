use rmpv::Value;

use crate::predictions::PredictionRecord;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid msgpack body: {0}")]
    Decode(#[from] rmpv::decode::Error),
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error("payload is missing `{0}`")]
    Missing(&'static str),
    #[error("no label for class index {0}")]
    UnknownClass(i64),
}

/// Body of a `POST /` from the filter: `[tag, {"frame": .., "output": ..}]`.
#[derive(Debug, Clone)]
pub struct InferencePayload {
    pub frame: Vec<u8>,
    pub output: PredictionRecord,
}

impl InferencePayload {
    pub fn from_msgpack(body: &[u8]) -> Result<Self, PayloadError> {
        let mut rd = body;
        let value = rmpv::decode::read_value(&mut rd)?;

        let Value::Array(items) = &value else {
            return Err(PayloadError::Malformed("body is not an array"));
        };
        let Some(Value::Map(fields)) = items.get(1) else {
            return Err(PayloadError::Malformed("second element is not a map"));
        };
        let field = |name: &'static str| {
            fields
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v)
                .ok_or(PayloadError::Missing(name))
        };

        let mut frame = Vec::new();
        flatten_frame(field("frame")?, &mut frame)?;
        let output = PredictionRecord::from_msgpack(field("output")?)?;

        Ok(InferencePayload { frame, output })
    }
}

/// Frames arrive either as raw bytes or as (possibly nested) integer lists.
/// Integers are narrowed to `u8` with wrap-around.
fn flatten_frame(value: &Value, out: &mut Vec<u8>) -> Result<(), PayloadError> {
    match value {
        Value::Binary(bytes) => out.extend_from_slice(bytes),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Integer(n) => {
                        let n = n
                            .as_i64()
                            .or_else(|| n.as_u64().map(|u| u as i64))
                            .ok_or(PayloadError::Malformed("frame value out of range"))?;
                        out.push(n as u8);
                    }
                    nested => flatten_frame(nested, out)?,
                }
            }
        }
        _ => return Err(PayloadError::Malformed("frame is neither bytes nor a list")),
    }
    Ok(())
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => n.as_f64(),
        Value::F32(f) => Some(*f as f64),
        Value::F64(f) => Some(*f),
        _ => None,
    }
}
