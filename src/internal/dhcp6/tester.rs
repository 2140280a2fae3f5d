use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::net::Ipv6Addr;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::internal::dhcp6::request::{Dhcp6Request, RequestError};

// Exit status for a run without a granted lease, including one that failed.
pub const STATUS_NO_LEASE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Requesting,
    Granted,
    Releasing,
    Released,
    Failed,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::Requesting => "requesting",
            LeaseState::Granted => "granted",
            LeaseState::Releasing => "releasing",
            LeaseState::Released => "released",
            LeaseState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseAddress {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub preferred_lft: u32,
    pub valid_lft: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub uuid: Uuid,
    pub state: LeaseState,
    pub acquired: DateTime<Utc>,
    pub addresses: Vec<LeaseAddress>,
    pub dns_servers: Vec<Ipv6Addr>,
    pub dns_search: Vec<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6Event {
    Acquired(Lease),
    Released,
    Lost,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} [{code}]")]
pub struct AcquireError {
    pub message: String,
    pub code: i32,
}

pub trait Dhcp6Client {
    // Events arrive on the returned channel until the client is done.
    fn acquire(
        &mut self,
        ifname: &str,
        request: &Dhcp6Request,
    ) -> Result<mpsc::Receiver<Dhcp6Event>, AcquireError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TesterError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("{ifname}: DHCPv6 acquire request {uuid} failed: {source}")]
    AcquireFailed {
        ifname: String,
        uuid: Uuid,
        #[source]
        source: AcquireError,
    },
    #[error("Cannot write lease: {0}")]
    Output(#[from] std::io::Error),
}

// Returns 0 once a granted lease has been dumped to `out`, or
// STATUS_NO_LEASE if the event stream ended or `shutdown` fired first.
// Callers exit with STATUS_NO_LEASE on any error.
pub async fn run<C, W, F>(
    client: &mut C,
    ifname: &str,
    document: Option<&str>,
    timeout: Option<u32>,
    out: &mut W,
    shutdown: F,
) -> Result<i32, TesterError>
where
    C: Dhcp6Client,
    W: Write,
    F: Future<Output = ()>,
{
    let mut request = Dhcp6Request::from_document(document)?;
    request.override_timeout(timeout);

    let mut events = client.acquire(ifname, &request).map_err(|source| {
        tracing::error!("{}: DHCPv6 acquire request {} failed: {}", ifname, request.uuid, source);
        TesterError::AcquireFailed {
            ifname: ifname.to_string(),
            uuid: request.uuid,
            source,
        }
    })?;

    let mut status = STATUS_NO_LEASE;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(Dhcp6Event::Acquired(lease)) => {
                    tracing::debug!("{}: lease {} acquired in state {:?}", ifname, lease.uuid, lease.state);
                    if lease.state == LeaseState::Granted {
                        dump_lease(out, &lease, ifname)?;
                        status = 0;
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    Ok(status)
}

// Shell-style `KEY='value'` lines, safe to source.
pub fn dump_lease<W: Write>(out: &mut W, lease: &Lease, ifname: &str) -> std::io::Result<()> {
    let mut put = |key: &str, value: &str| writeln!(out, "{}={}", key, shell_quote(value));

    put("INTERFACE", ifname)?;
    put("UUID", &lease.uuid.to_string())?;
    put("FAMILY", "ipv6")?;
    put("TYPE", "dhcp")?;
    put("STATE", lease.state.as_str())?;
    put("ACQUIRED", &lease.acquired.to_rfc3339())?;
    for (i, addr) in lease.addresses.iter().enumerate() {
        put(&format!("IPADDR_{}", i), &format!("{}/{}", addr.address, addr.prefix_len))?;
        put(&format!("PREFERRED_LIFETIME_{}", i), &addr.preferred_lft.to_string())?;
        put(&format!("VALID_LIFETIME_{}", i), &addr.valid_lft.to_string())?;
    }
    if !lease.dns_servers.is_empty() {
        let servers: Vec<String> = lease.dns_servers.iter().map(|s| s.to_string()).collect();
        put("DNSSERVERS", &servers.join(" "))?;
    }
    if !lease.dns_search.is_empty() {
        put("DNSSEARCH", &lease.dns_search.join(" "))?;
    }
    if let Some(hostname) = &lease.hostname {
        put("HOSTNAME", hostname)?;
    }
    Ok(())
}

// Single quotes end the quoted run, so each one becomes '\''.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
