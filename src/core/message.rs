use crate::core::error::ProbeError;
use serde_json::{Map, Value};

/// Fluent builder for the JSON envelope exchanged over the broker.
///
/// Recognized keys are `from`, `to`, `command`, `seq`, `time` and `track_id`;
/// arbitrary extra fields go through [`MsgBuilder::set_field`]. A key is only
/// present in the serialized form once it has been set.
#[derive(Debug, Default, Clone)]
pub struct MsgBuilder {
    data: Map<String, Value>,
    seq: u64,
}

impl MsgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the builder from an existing JSON object.
    pub fn from_template(template: &str) -> Result<Self, ProbeError> {
        let data = serde_json::from_str(template).map_err(ProbeError::Template)?;
        Ok(Self { data, seq: 0 })
    }

    pub fn sender(mut self, name: &str) -> Self {
        self.data.insert("from".to_string(), Value::from(name));
        self
    }

    pub fn receiver(mut self, name: &str) -> Self {
        self.data.insert("to".to_string(), Value::from(name));
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.data.insert("command".to_string(), Value::from(cmd));
        self
    }

    /// `0` assigns the next value from the builder's own counter (first call
    /// yields 1); anything else is stored verbatim.
    pub fn seq(mut self, n: u64) -> Self {
        let value = if n == 0 {
            self.seq += 1;
            self.seq
        } else {
            n
        };
        self.data.insert("seq".to_string(), Value::from(value));
        self
    }

    /// `0` stamps the current wall-clock time in milliseconds since epoch.
    pub fn time(mut self, ms: u64) -> Self {
        let value = if ms == 0 { current_timestamp() } else { ms };
        self.data.insert("time".to_string(), Value::from(value));
        self
    }

    /// The id doubles as its own key. Consumers that want the conventional
    /// `track_id` key use `set_field("track_id", ..)` instead.
    pub fn set_track_id(mut self, track_id: &str) -> Self {
        self.data
            .insert(track_id.to_string(), Value::from(track_id));
        self
    }

    pub fn set_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.data.insert(name.to_string(), value.into());
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Serializes the envelope in insertion order.
    pub fn build(&self) -> String {
        serde_json::to_string(&self.data).expect("JSON object serialization cannot fail")
    }
}

/// Milliseconds since epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
