// Request documents for DHCPv6 test mode.
//
// ```xml
// <request type="lease">
//   <uuid>...</uuid>
//   <mode>managed</mode>
//   <acquire-timeout>20</acquire-timeout>
//   <hostname>client.example.com</hostname>
//   <clientid>00:03:00:01:02:42:ac:11:00:02</clientid>
// </request>
// ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_ACQUIRE_TIMEOUT: u32 = 10;
const MAX_DUID_LEN: usize = 130;
const MAX_DOMAIN_LEN: usize = 253;

static DOMAIN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.?$")
        .expect("Invalid domain name regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRun {
    Offer,
    Lease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dhcp6Mode {
    Auto,
    Info,
    Managed,
}

impl FromStr for Dhcp6Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Dhcp6Mode::Auto),
            "info" => Ok(Dhcp6Mode::Info),
            "managed" => Ok(Dhcp6Mode::Managed),
            other => Err(format!("unknown dhcp6 mode \"{}\"", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dhcp6Request {
    pub uuid: Uuid,
    pub dry_run: DryRun,
    pub mode: Dhcp6Mode,
    pub acquire_timeout: u32,
    pub hostname: Option<String>,
    pub clientid: Option<String>,
    pub rapid_commit: bool,
}

impl Default for Dhcp6Request {
    fn default() -> Self {
        Self {
            uuid: Uuid::nil(),
            dry_run: DryRun::Offer,
            mode: Dhcp6Mode::Managed,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            hostname: None,
            clientid: None,
            rapid_commit: false,
        }
    }
}

impl Dhcp6Request {
    // Build a test-mode request from an optional XML document. Rapid commit
    // is always off and a missing UUID is generated.
    pub fn from_document(document: Option<&str>) -> Result<Self, RequestError> {
        let mut request = Self::default();
        if let Some(text) = document.filter(|t| !t.trim().is_empty()) {
            request.apply_xml(text)?;
        }

        request.rapid_commit = false;
        if request.uuid.is_nil() {
            request.uuid = Uuid::new_v4();
        }
        Ok(request)
    }

    // A timeout given on the command line beats the document.
    pub fn override_timeout(&mut self, timeout: Option<u32>) {
        if let Some(timeout) = timeout {
            self.acquire_timeout = timeout;
        }
    }

    fn apply_xml(&mut self, text: &str) -> Result<(), RequestError> {
        let doc = roxmltree::Document::parse(text).map_err(|e| RequestError::Xml(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "request" {
            return Err(RequestError::InvalidRoot(root.tag_name().name().to_string()));
        }

        match root.attribute("type").or_else(|| root.attribute("mode")) {
            Some("offer") => self.dry_run = DryRun::Offer,
            Some("lease") => self.dry_run = DryRun::Lease,
            _ => {}
        }

        for child in root.children().filter(|n| n.is_element()) {
            let element = child.tag_name().name();
            let value = child.text().unwrap_or("").trim();
            let invalid = |reason: String| {
                let pos = doc.text_pos_at(child.range().start);
                RequestError::InvalidElement {
                    element: element.to_string(),
                    location: format!("{}:{}", pos.row, pos.col),
                    value: value.to_string(),
                    reason,
                }
            };

            match element {
                "uuid" => {
                    if !value.is_empty() {
                        self.uuid = Uuid::parse_str(value).map_err(|e| invalid(e.to_string()))?;
                    }
                }
                "mode" => self.mode = value.parse().map_err(invalid)?,
                "acquire-timeout" => {
                    self.acquire_timeout = value.parse().map_err(|e| {
                        invalid(format!("{}", e))
                    })?;
                }
                "hostname" => {
                    if !is_valid_domain_name(value) {
                        return Err(invalid("not a valid domain name".to_string()));
                    }
                    self.hostname = Some(value.to_string());
                }
                "clientid" => {
                    parse_duid_hex(value).map_err(invalid)?;
                    self.clientid = Some(value.to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

pub fn is_valid_domain_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_DOMAIN_LEN && DOMAIN_NAME.is_match(name)
}

// Decode a client identifier written as hex, optionally colon separated.
pub fn parse_duid_hex(text: &str) -> Result<Vec<u8>, String> {
    let compact: String = text.chars().filter(|c| *c != ':').collect();
    let bytes = hex::decode(&compact).map_err(|e| e.to_string())?;
    if bytes.is_empty() || bytes.len() > MAX_DUID_LEN {
        return Err(format!("client id length {} out of range", bytes.len()));
    }
    Ok(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Cannot parse dhcp6 request xml: {0}")]
    Xml(String),
    #[error("Invalid dhcp6 request xml: root element is '{0}', expected 'request'")]
    InvalidRoot(String),
    #[error("Cannot parse dhcp6 request '{element}' at {location}: {value} ({reason})")]
    InvalidElement {
        element: String,
        location: String,
        value: String,
        reason: String,
    },
}
