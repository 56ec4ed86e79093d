use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use archiflow_messages::AgentMessage;

/// One delivered bus message: a payload stamped with its topic, the dense
/// per-topic sequence assigned at publish time, and the arrival timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: AgentMessage,
}
