//! ESL event parsing and representation
//!
//! A parsed frame from the event socket: header block plus optional body.
//! Event bodies of `text/event-plain` frames are themselves header blocks and
//! are parsed with the same routine.

use std::collections::HashMap;
use std::fmt;

use crate::constants::{
    CONTENT_TYPE_AUTH, CONTENT_TYPE_DISCONNECT, CONTENT_TYPE_EVENT, CONTENT_TYPE_REPLY,
};

/// ESL Event structure
///
/// Header values arrive URL-encoded and are stored decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EslEvent {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl EslEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an ESL header block
    ///
    /// ```text
    /// Header-Name: value
    /// Another-Header: another value
    ///
    /// Optional body content
    /// ```
    pub fn parse(raw: &str) -> Self {
        let mut headers = HashMap::new();
        let mut body_lines = Vec::new();
        let mut in_body = false;

        for line in raw.lines() {
            if in_body {
                body_lines.push(line);
                continue;
            }

            // Empty line separates headers from body
            if line.trim().is_empty() {
                if !headers.is_empty() {
                    in_body = true;
                }
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim();
                let decoded = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                headers.insert(key.trim().to_string(), decoded);
            }
        }

        let body = if body_lines.is_empty() {
            None
        } else {
            Some(body_lines.join("\n"))
        };

        Self { headers, body }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// First non-empty value among `names`
    pub fn first_header(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.get_header(name))
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
    }

    /// Builder form of [`set_header`](Self::set_header)
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    pub fn event_name(&self) -> Option<&str> {
        self.get_header("Event-Name")
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.get_header("Unique-ID")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("Content-Type")
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get_header("Content-Length").and_then(|s| s.parse().ok())
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.get_header("Reply-Text")
    }

    pub fn is_auth_request(&self) -> bool {
        self.content_type() == Some(CONTENT_TYPE_AUTH)
    }

    pub fn is_command_reply(&self) -> bool {
        self.content_type() == Some(CONTENT_TYPE_REPLY)
    }

    /// Frame carrying a plain-text event in its body
    pub fn is_event_plain(&self) -> bool {
        self.content_type() == Some(CONTENT_TYPE_EVENT)
    }

    pub fn is_disconnect_notice(&self) -> bool {
        self.content_type() == Some(CONTENT_TYPE_DISCONNECT)
    }

    /// Reply starts with +OK
    pub fn is_ok(&self) -> bool {
        self.reply_text()
            .map(|t| t.starts_with("+OK"))
            .unwrap_or(false)
    }

    /// Reply starts with -ERR
    pub fn is_error(&self) -> bool {
        self.reply_text()
            .map(|t| t.starts_with("-ERR"))
            .unwrap_or(false)
    }

    pub fn error_message(&self) -> Option<String> {
        if !self.is_error() {
            return None;
        }
        self.reply_text()
            .map(|t| t.strip_prefix("-ERR ").unwrap_or(t).to_string())
    }

    /// Event carried in the body of a `text/event-plain` frame
    pub fn inner_event(&self) -> Option<EslEvent> {
        if !self.is_event_plain() {
            return None;
        }
        self.body().map(EslEvent::parse)
    }

    /// Channel variable (`variable_<name>` header)
    pub fn get_variable(&self, name: &str) -> Option<&str> {
        self.get_header(&format!("variable_{}", name))
    }
}

impl fmt::Display for EslEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EslEvent {{")?;

        if let Some(event_name) = self.event_name() {
            write!(f, " Event-Name: {}", event_name)?;
        }

        if let Some(uuid) = self.unique_id() {
            write!(f, ", UUID: {}", uuid)?;
        }

        if let Some(content_type) = self.content_type() {
            write!(f, ", Content-Type: {}", content_type)?;
        }

        write!(f, ", Headers: {} }}", self.headers.len())
    }
}
