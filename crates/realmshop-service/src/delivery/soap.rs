//! SOAP remote command channel.
//!
//! The game world exposes a single `executeCommand` operation. One call carries
//! one command and answers with free text.

use std::time::Duration;

use reqwest::Client;

use realmshop_core::RealmChannel;

/// Error type for remote channel calls.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport failure (connect, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with an error status.
    #[error("status {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Leading part of the body.
        body: String,
    },

    /// The endpoint answered with a SOAP fault.
    #[error("SOAP fault: {0}")]
    Fault(String),
}

/// Leading body characters kept in a status error.
const ERROR_BODY_PREVIEW: usize = 300;

/// SOAP client for the remote command channel.
#[derive(Debug, Clone, Default)]
pub struct SoapClient {
    http: Client,
}

impl SoapClient {
    /// Create a client. Timeouts are set per channel on each call.
    #[must_use]
    pub fn new() -> Self {
        Self { http: Client::new() }
    }

    /// Execute one command on a channel and return the response text.
    pub async fn execute(&self, channel: &RealmChannel, command: &str) -> Result<String, ChannelError> {
        let mut request = self
            .http
            .post(&channel.endpoint)
            .header("content-type", "text/xml; charset=utf-8")
            .timeout(Duration::from_secs(channel.timeout_seconds.max(1)))
            .body(envelope(command));

        if let Some(user) = &channel.user {
            request = request.basic_auth(user, channel.password.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() >= 400 {
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }
        if let Some(fault) = fault_string(&text) {
            return Err(ChannelError::Fault(fault));
        }

        Ok(element_text(&text, "result").unwrap_or(text))
    }
}

/// Wrap a command in an `executeCommand` envelope.
fn envelope(command: &str) -> String {
    format!(
        r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns1="urn:AC">
  <SOAP-ENV:Body>
    <ns1:executeCommand>
      <command>{}</command>
    </ns1:executeCommand>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        xml_escape(command)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text of the first `<name>` element, ignoring any namespace prefix.
fn element_text(xml: &str, name: &str) -> Option<String> {
    let open = xml
        .match_indices('<')
        .map(|(idx, _)| idx)
        .find(|&idx| {
            let tag = &xml[idx + 1..];
            let local = tag
                .split(|c: char| c == '>' || c.is_whitespace())
                .next()
                .unwrap_or_default();
            local.rsplit(':').next() == Some(name) && !local.starts_with('/')
        })?;
    let start = open + xml[open..].find('>')? + 1;
    let end = start + xml[start..].find("</")?;
    Some(xml_unescape(xml[start..end].trim()))
}

/// The fault string if the response is a SOAP fault.
fn fault_string(xml: &str) -> Option<String> {
    if !xml.contains(":Fault>") && !xml.contains("<Fault>") {
        return None;
    }
    Some(element_text(xml, "faultstring").unwrap_or_else(|| "unknown fault".into()))
}
