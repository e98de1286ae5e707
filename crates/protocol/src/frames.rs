use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::Address;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("field '{0}' must be a non-zero id")]
    ZeroId(&'static str),
}

// ── Inbound ──────────────────────────────────────────────────────────────────

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Ping,
    Text(TextFrame),
}

/// Payload of a `text` frame.
///
/// Address and announcement fields are kept raw: only the first text frame
/// of a connection reads them, through [`TextFrame::registration`], so junk
/// in those fields on later frames never costs the client its text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextFrame {
    #[serde(default)]
    pub guildid: Option<Value>,
    #[serde(default)]
    pub channelid: Option<Value>,
    #[serde(default, rename = "connectedMsg")]
    pub connected_msg: Option<Value>,
    #[serde(default, rename = "disconnectedMsg")]
    pub disconnected_msg: Option<Value>,
    pub text: String,
}

/// The one-time binding data carried by a client's first text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub address: Address,
    pub connected_msg: String,
    pub disconnected_msg: String,
}

impl TextFrame {
    /// Extract and validate the registration fields.
    pub fn registration(&self) -> Result<Registration, FrameError> {
        let community = id_field("guildid", self.guildid.as_ref())?;
        let channel = id_field("channelid", self.channelid.as_ref())?;
        Ok(Registration {
            address: Address::new(community, channel),
            connected_msg: text_field("connectedMsg", self.connected_msg.as_ref())?,
            disconnected_msg: text_field("disconnectedMsg", self.disconnected_msg.as_ref())?,
        })
    }
}

/// Snowflake ids do not survive a round-trip through a JS number, so browser
/// clients send them as strings. Accept both.
fn id_field(field: &'static str, value: Option<&Value>) -> Result<u64, FrameError> {
    let invalid = |reason: String| FrameError::InvalidField { field, reason };
    let id = match value {
        None | Some(Value::Null) => return Err(FrameError::MissingField(field)),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| invalid(format!("{n} is not an unsigned id")))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|e| invalid(format!("{s:?}: {e}")))?,
        Some(other) => return Err(invalid(format!("unexpected {other}"))),
    };
    if id == 0 {
        return Err(FrameError::ZeroId(field));
    }
    Ok(id)
}

fn text_field(field: &'static str, value: Option<&Value>) -> Result<String, FrameError> {
    match value {
        None | Some(Value::Null) => Err(FrameError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(FrameError::InvalidField {
            field,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Parse and validate one inbound text frame.
pub fn parse_client_frame(raw: &str) -> Result<ClientFrame, FrameError> {
    Ok(serde_json::from_str(raw)?)
}

/// Same as [`parse_client_frame`] for frames that arrived as binary messages.
pub fn parse_client_frame_bytes(raw: &[u8]) -> Result<ClientFrame, FrameError> {
    Ok(serde_json::from_slice(raw)?)
}

// ── Outbound ─────────────────────────────────────────────────────────────────

/// A frame sent to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Pong,
    Text {
        author: String,
        channel: String,
        text: String,
    },
}

impl ServerFrame {
    pub fn text(
        author: impl Into<String>,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::Text {
            author: author.into(),
            channel: channel.into(),
            text: text.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
