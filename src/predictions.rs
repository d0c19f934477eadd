use std::{collections::HashMap, fs, path::Path};

use rmpv::Value;
use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::payload::{as_number, PayloadError};

/// How many entries of a plain output tensor are reported.
pub const OUTPUT_SIZE: usize = 5;

/// Class index 0 of the classifier; the label table has no entry for it.
pub const BACKGROUND: &str = "background";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrediction {
    pub idx: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Classifier output as sent by the filter.
///
/// `Plain` is every value of the output tensor. `Ordered` is the filter's
/// top-k view, `{"0": {"idx": .., "value": ..}, "1": ..}`, kept in the order
/// the map arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionRecord {
    Plain(Vec<f64>),
    Ordered(Vec<(String, RankedPrediction)>),
}

impl PredictionRecord {
    pub fn from_msgpack(value: &Value) -> Result<Self, PayloadError> {
        match value {
            Value::Array(values) => values
                .iter()
                .map(|v| as_number(v).ok_or(PayloadError::Malformed("output value is not a number")))
                .collect::<Result<Vec<_>, _>>()
                .map(PredictionRecord::Plain),
            Value::Map(entries) => entries
                .iter()
                .map(|(rank, entry)| Ok((rank_key(rank)?, ranked_entry(entry)?)))
                .collect::<Result<Vec<_>, _>>()
                .map(PredictionRecord::Ordered),
            _ => Err(PayloadError::Malformed("output is neither a list nor a map")),
        }
    }

    /// Class indices in rank order.
    ///
    /// For a plain tensor these are the `OUTPUT_SIZE` highest scoring
    /// positions, best first.
    pub fn top_indices(&self) -> Vec<i64> {
        match self {
            PredictionRecord::Ordered(entries) => entries.iter().map(|(_, p)| p.idx).collect(),
            PredictionRecord::Plain(values) => {
                let mut ranked: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                ranked
                    .into_iter()
                    .take(OUTPUT_SIZE)
                    .map(|(i, _)| i as i64)
                    .collect()
            }
        }
    }
}

impl Serialize for PredictionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PredictionRecord::Plain(values) => values.serialize(serializer),
            PredictionRecord::Ordered(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (rank, prediction) in entries {
                    map.serialize_entry(rank, prediction)?;
                }
                map.end()
            }
        }
    }
}

fn rank_key(value: &Value) -> Result<String, PayloadError> {
    match value {
        Value::String(s) => s
            .as_str()
            .map(str::to_owned)
            .ok_or(PayloadError::Malformed("rank key is not valid utf-8")),
        Value::Integer(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string()))
            .ok_or(PayloadError::Malformed("rank key is not an integer")),
        _ => Err(PayloadError::Malformed("rank key is not a string")),
    }
}

fn ranked_entry(value: &Value) -> Result<RankedPrediction, PayloadError> {
    let Value::Map(fields) = value else {
        return Err(PayloadError::Malformed("ranked prediction is not a map"));
    };
    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k.as_str() == Some(name))
            .map(|(_, v)| v)
    };

    let idx = field("idx")
        .and_then(Value::as_i64)
        .ok_or(PayloadError::Missing("idx"))?;
    let value = field("value").and_then(as_number);

    Ok(RankedPrediction { idx, value })
}

/// Class index to human-readable label, as shipped in
/// `imagenet_class_index.json`.
///
/// Entries are either a bare name or the Keras `[wnid, name]` pair.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    entries: HashMap<String, serde_json::Value>,
}

impl LabelTable {
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let entries = serde_json::from_slice(bytes)?;
        Ok(LabelTable { entries })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_slice(&fs::read(path)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, key: i64) -> Option<String> {
        match self.entries.get(&key.to_string())? {
            serde_json::Value::String(name) => Some(name.clone()),
            serde_json::Value::Array(parts) => parts
                .iter()
                .rev()
                .find_map(|p| p.as_str())
                .map(str::to_owned),
            other => Some(other.to_string()),
        }
    }
}

/// Label for a classifier index.
///
/// The classifier reserves index 0 for background while the label table
/// starts at its first real class, so index `i` maps to table key `i - 1`.
pub fn decode_label(idx: i64, table: &LabelTable) -> Result<String, PayloadError> {
    if idx == 0 {
        return Ok(BACKGROUND.to_owned());
    }
    idx.checked_sub(1)
        .and_then(|key| table.name(key))
        .ok_or(PayloadError::UnknownClass(idx))
}

pub fn decode_labels(record: &PredictionRecord, table: &LabelTable) -> Result<Vec<String>, PayloadError> {
    record
        .top_indices()
        .into_iter()
        .map(|idx| decode_label(idx, table))
        .collect()
}
