//! Results reported by agents and the command-results blob they become.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{self, lenient};
use crate::error::EncodingError;
use crate::link::LinkStatus;

/// A single link outcome reported by an agent. Consumed once by the result
/// processor; never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResult {
    pub id: String,

    /// Base64 stdout.
    #[serde(default)]
    pub output: String,

    /// Base64 stderr.
    #[serde(default)]
    pub stderr: String,

    #[serde(default)]
    pub exit_code: serde_json::Value,

    #[serde(default, deserialize_with = "lenient::i64_or_zero")]
    pub status: i64,

    #[serde(default, deserialize_with = "lenient::i64_or_zero")]
    pub pid: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_reported_time: Option<String>,
}

impl LinkResult {
    pub fn link_status(&self) -> LinkStatus {
        LinkStatus::from_reported(self.status)
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty() || !self.stderr.is_empty()
    }

    /// Parse the agent's timestamp. Unparseable values are dropped.
    pub fn reported_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.agent_reported_time.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

/// The stored form of a link's output: `{stdout, stderr, exit_code}` JSON,
/// base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResults {
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub exit_code: serde_json::Value,
}

impl CommandResults {
    /// Build from the base64 fields an agent reported. A field that is not
    /// valid base64 is kept as the agent sent it.
    pub fn from_reported(output: &str, stderr: &str, exit_code: serde_json::Value) -> Self {
        Self {
            stdout: encoding::decode_or_raw(output),
            stderr: encoding::decode_or_raw(stderr),
            exit_code,
        }
    }

    pub fn encode(&self) -> Result<String, EncodingError> {
        Ok(encoding::encode_string(&serde_json::to_string(self)?))
    }

    pub fn decode(blob: &str) -> Result<Self, EncodingError> {
        Ok(serde_json::from_str(&encoding::decode_bytes(blob)?)?)
    }
}
