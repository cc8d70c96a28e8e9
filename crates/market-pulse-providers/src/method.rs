use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// A computation requested alongside a time series in one provider call.
///
/// `Simple` serializes as its bare name (`"time_series"`); `Complex` as an object holding
/// the name and its parameters (`{"name": "atr", "time_period": 14}`).
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Simple { name: String },
    Complex {
        name: String,
        params: BTreeMap<String, Value>,
    },
}

impl Method {
    /// Raw OHLCV bars.
    pub fn time_series() -> Self {
        Method::Simple {
            name: "time_series".to_string(),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Method::Simple { name } => serializer.serialize_str(name),
            Method::Complex { name, params } => {
                let mut map = serializer.serialize_map(Some(params.len() + 1))?;
                map.serialize_entry("name", name)?;
                for (key, value) in params {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}
