//! Minimal SIP message parsing: request/status line, headers, and the two
//! SDP details the capture cares about (extensions and the media port).
//!
//! This is deliberately not a full RFC 3261 parser. The capture only needs
//! Call-ID, From/To extensions and dialog boundaries from passively observed
//! traffic, and drops anything it cannot read.

/// Whether a message is a request or a response, with its raw start line
/// preserved for canonical reserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipKind {
    Request { method: String },
    Response { status: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub kind: SipKind,
    start_line: String,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl SipMessage {
    /// Parses a UDP payload as SIP. Returns None for anything that does not
    /// carry a SIP start line.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(data);
        let (head, body) = match text.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body.to_string()),
            None => (text.as_ref(), String::new()),
        };

        let mut lines = head.split("\r\n");
        let start_line = lines.next()?.to_string();

        let kind = if let Some(rest) = start_line.strip_prefix("SIP/2.0 ") {
            SipKind::Response { status: rest.to_string() }
        } else if start_line.contains(" SIP/2.0") {
            let method = start_line.split(' ').next()?.to_string();
            SipKind::Request { method }
        } else {
            return None;
        };

        let mut headers = Vec::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(": ") {
                headers.push((name.to_string(), value.trim().to_string()));
            }
        }

        Some(Self { kind, start_line, headers, body })
    }

    /// Case-insensitive header lookup; first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    pub fn method(&self) -> Option<&str> {
        match &self.kind {
            SipKind::Request { method } => Some(method),
            SipKind::Response { .. } => None,
        }
    }

    /// The user part of the first `sip:NNNN@` URI in the From header.
    pub fn from_extension(&self) -> Option<String> {
        self.header("From").and_then(extension_of)
    }

    /// The user part of the first `sip:NNNN@` URI in the To header.
    pub fn to_extension(&self) -> Option<String> {
        self.header("To").and_then(extension_of)
    }

    /// The media port from the first `m=audio` line of an SDP body.
    pub fn sdp_media_port(&self) -> Option<u16> {
        self.body
            .lines()
            .find(|line| line.starts_with("m=audio"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|port| port.parse().ok())
    }

    /// Canonical wire form: start line, headers, blank line, body. Parsing
    /// the canonical form yields an equal message.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.start_line);
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// Extracts the digits of the first `sip:NNNN@` URI in a header value.
fn extension_of(value: &str) -> Option<String> {
    let start = value.find("sip:")? + 4;
    let rest = &value[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('@') {
        return None;
    }
    Some(digits)
}
