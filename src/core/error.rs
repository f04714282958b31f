use std::fmt;

#[derive(Debug)]
pub enum ProbeError {
    NotConnected,
    Transport(String),
    PublishRejected { topic: String, attempts: u32 },
    Config(String),
    Template(serde_json::Error),
}

impl std::error::Error for ProbeError {}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::NotConnected => write!(f, "have not connected to a broker"),
            ProbeError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProbeError::PublishRejected { topic, attempts } => {
                write!(f, "publish to topic `{topic}` failed after {attempts} attempts")
            }
            ProbeError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            ProbeError::Template(err) => write!(f, "malformed message template: {err}"),
        }
    }
}
