use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Named channels carried over the bridge. The string forms are shared with
/// the target-side agent and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Ready,
    ProxyFail,
    Flush,
    InstanceDetails,
    ToggleInstance,
    VuexInit,
    VuexMutation,
    EventTriggered,
    InspectInstance,
    VuexToggleRecording,
    EventsToggleRecording,
    SelectInstance,
    GetContextMenuTarget,
    Refresh,
}

impl EventName {
    pub const ALL: [EventName; 14] = [
        EventName::Ready,
        EventName::ProxyFail,
        EventName::Flush,
        EventName::InstanceDetails,
        EventName::ToggleInstance,
        EventName::VuexInit,
        EventName::VuexMutation,
        EventName::EventTriggered,
        EventName::InspectInstance,
        EventName::VuexToggleRecording,
        EventName::EventsToggleRecording,
        EventName::SelectInstance,
        EventName::GetContextMenuTarget,
        EventName::Refresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Ready => "ready",
            EventName::ProxyFail => "proxy-fail",
            EventName::Flush => "flush",
            EventName::InstanceDetails => "instance-details",
            EventName::ToggleInstance => "toggle-instance",
            EventName::VuexInit => "vuex:init",
            EventName::VuexMutation => "vuex:mutation",
            EventName::EventTriggered => "event:triggered",
            EventName::InspectInstance => "inspect-instance",
            EventName::VuexToggleRecording => "vuex:toggle-recording",
            EventName::EventsToggleRecording => "events:toggle-recording",
            EventName::SelectInstance => "select-instance",
            EventName::GetContextMenuTarget => "get-context-menu-target",
            EventName::Refresh => "refresh",
        }
    }

    /// Events the panel only ever sends; a target echoing one back is ignored.
    pub fn is_outbound_only(&self) -> bool {
        matches!(
            self,
            EventName::VuexToggleRecording
                | EventName::EventsToggleRecording
                | EventName::SelectInstance
                | EventName::GetContextMenuTarget
                | EventName::Refresh
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == input)
            .ok_or_else(|| format!("Unknown event: {input}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: EventName, payload: Value) -> Self {
        Self {
            event: event.as_str().to_string(),
            payload,
        }
    }

    pub fn bare(event: EventName) -> Self {
        Self::new(event, Value::Null)
    }

    pub fn name(&self) -> Option<EventName> {
        self.event.parse().ok()
    }

    /// Serializes one newline-terminated line, refusing envelopes whose
    /// body would exceed `max_line_bytes`.
    pub fn to_line(&self, max_line_bytes: usize) -> Result<Vec<u8>, WireError> {
        let mut line =
            serde_json::to_vec(self).map_err(|err| WireError::Unencodable(err.to_string()))?;
        if line.len() > max_line_bytes {
            return Err(WireError::TooLarge {
                size: line.len(),
                max: max_line_bytes,
            });
        }
        line.push(b'\n');
        Ok(line)
    }

    /// Parses one line, with or without its `\n` or `\r\n` ending.
    pub fn from_line(line: &[u8], max_line_bytes: usize) -> Result<Self, WireError> {
        let body = strip_line_ending(line);
        if body.len() > max_line_bytes {
            return Err(WireError::TooLarge {
                size: body.len(),
                max: max_line_bytes,
            });
        }
        let envelope: Envelope =
            serde_json::from_slice(body).map_err(|err| WireError::Malformed(err.to_string()))?;
        if envelope.event.is_empty() {
            return Err(WireError::MissingEvent);
        }
        Ok(envelope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("envelope of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("{size} bytes buffered without a line break, limit is {max}")]
    Unterminated { size: usize, max: usize },
    #[error("envelope could not be serialized: {0}")]
    Unencodable(String),
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope has an empty event name")]
    MissingEvent,
}

/// What one read produced: envelopes in wire order, plus the lines that
/// were rejected.
#[derive(Debug, Clone, Default)]
pub struct Inbound {
    pub envelopes: Vec<Envelope>,
    pub errors: Vec<WireError>,
}

impl Inbound {
    fn accept(&mut self, line: &[u8], max_line_bytes: usize) {
        match Envelope::from_line(line, max_line_bytes) {
            Ok(envelope) => self.envelopes.push(envelope),
            Err(err) => self.errors.push(err),
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let body = line.strip_suffix(b"\n").unwrap_or(line);
    body.strip_suffix(b"\r").unwrap_or(body)
}

/// Reassembles envelopes from a byte stream that may split or batch lines
/// arbitrarily. A rejected line never poisons the ones after it.
#[derive(Debug)]
pub struct EnvelopeReader {
    max_line_bytes: usize,
    buffered: Vec<u8>,
}

impl Default for EnvelopeReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl EnvelopeReader {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            buffered: Vec::new(),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Inbound {
        let mut inbound = Inbound::default();
        self.buffered.extend_from_slice(chunk);

        let Some(last_newline) = self.buffered.iter().rposition(|byte| *byte == b'\n') else {
            self.enforce_limit(&mut inbound);
            return inbound;
        };
        let complete: Vec<u8> = self.buffered.drain(..=last_newline).collect();
        for line in complete.split(|byte| *byte == b'\n') {
            if strip_line_ending(line).is_empty() {
                continue;
            }
            inbound.accept(line, self.max_line_bytes);
        }
        self.enforce_limit(&mut inbound);
        inbound
    }

    /// Parses whatever is left once the peer has closed.
    pub fn finish(&mut self) -> Inbound {
        let mut inbound = Inbound::default();
        let rest = std::mem::take(&mut self.buffered);
        if !strip_line_ending(&rest).is_empty() {
            inbound.accept(&rest, self.max_line_bytes);
        }
        inbound
    }

    fn enforce_limit(&mut self, inbound: &mut Inbound) {
        if self.buffered.len() > self.max_line_bytes {
            inbound.errors.push(WireError::Unterminated {
                size: self.buffered.len(),
                max: self.max_line_bytes,
            });
            self.buffered.clear();
        }
    }
}
