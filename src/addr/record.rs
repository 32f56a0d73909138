//! Per-destination address records

use crate::config::{parse_resource, Config};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::{debug, warn};

/// Logical remote endpoint the agent may connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Redirector,
    Manager,
}

impl Destination {
    pub const ALL: [Destination; 2] = [Destination::Redirector, Destination::Manager];

    pub fn name(&self) -> &'static str {
        match self {
            Destination::Redirector => "redirector",
            Destination::Manager => "manager",
        }
    }

    fn index(&self) -> usize {
        match self {
            Destination::Redirector => 0,
            Destination::Manager => 1,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redirector" => Ok(Destination::Redirector),
            "manager" => Ok(Destination::Manager),
            other => Err(Error::parse(format!("Unknown destination: {}", other))),
        }
    }
}

/// Address family of a lookup or of a resolved address list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn matches(&self, ip: &IpAddr) -> bool {
        AddressFamily::of(ip) == *self
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("ipv4"),
            AddressFamily::Ipv6 => f.write_str("ipv6"),
        }
    }
}

/// Resolution state of one destination.
///
/// The record exclusively owns its address list. The cursor indexes into the
/// list while it is non-empty and carries no meaning otherwise.
#[derive(Debug, Clone)]
pub struct AddressRecord {
    destination: Destination,
    /// Resource string as configured
    pub resource: Option<String>,
    pub hostname: String,
    pub proto: String,
    pub port: u16,
    family: Option<AddressFamily>,
    valid: bool,
    resolved: bool,
    updated: bool,
    addrs: Vec<IpAddr>,
    cursor: usize,
}

impl AddressRecord {
    /// Unconfigured record; never resolvable
    pub fn new(destination: Destination) -> Self {
        AddressRecord {
            destination,
            resource: None,
            hostname: String::new(),
            proto: String::new(),
            port: 0,
            family: None,
            valid: false,
            resolved: false,
            updated: false,
            addrs: Vec::new(),
            cursor: 0,
        }
    }

    /// Build from a `proto:host:port` resource. A malformed resource yields an
    /// invalid record rather than an error.
    pub fn from_resource(destination: Destination, resource: &str) -> Self {
        let mut record = AddressRecord::new(destination);
        record.resource = Some(resource.to_string());

        match parse_resource(resource) {
            Ok(parsed) => {
                record.hostname = parsed.host;
                record.proto = parsed.proto;
                record.port = parsed.port;
                record.valid = true;
            }
            Err(e) => {
                warn!("{}: ignoring resource '{}': {}", destination, resource, e);
            }
        }
        record
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    /// Hostname is configured
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Caller has consumed the latest resolution
    pub fn mark_updated(&mut self) {
        self.updated = true;
    }

    pub(crate) fn reset_flags(&mut self) {
        self.updated = false;
        self.resolved = false;
    }

    pub fn family(&self) -> Option<AddressFamily> {
        self.family
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addrs
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Address under the cursor, if any
    pub fn current(&self) -> Option<IpAddr> {
        self.addrs.get(self.cursor).copied()
    }

    /// Move the cursor one entry forward. Never wraps.
    pub fn advance(&mut self) {
        self.cursor = self.cursor.saturating_add(1);
    }

    /// Take an owned copy of a completion's addresses
    pub(crate) fn populate(&mut self, addrs: &[IpAddr], family: AddressFamily) {
        self.addrs = addrs.to_vec();
        self.family = Some(family);
        self.cursor = 0;
        self.resolved = true;
    }

    /// Release the address list. Idempotent.
    pub fn free_addresses(&mut self) {
        if !self.addrs.is_empty() {
            debug!("{}: releasing {} addresses", self.destination, self.addrs.len());
        }
        self.addrs = Vec::new();
        self.cursor = 0;
    }
}

/// All destination records plus the currently selected destination
#[derive(Debug, Clone)]
pub struct AddressBook {
    records: [AddressRecord; 2],
    current: Destination,
}

impl AddressBook {
    pub fn new(current: Destination) -> Self {
        AddressBook {
            records: Destination::ALL.map(AddressRecord::new),
            current,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut book = AddressBook::new(config.destination);
        for dest in Destination::ALL {
            if let Some(resource) = config.resource(dest) {
                book.insert(AddressRecord::from_resource(dest, resource));
            }
        }
        book
    }

    /// Replace the record for its destination
    pub fn insert(&mut self, record: AddressRecord) {
        let idx = record.destination().index();
        self.records[idx] = record;
    }

    pub fn get(&self, dest: Destination) -> &AddressRecord {
        &self.records[dest.index()]
    }

    pub fn get_mut(&mut self, dest: Destination) -> &mut AddressRecord {
        &mut self.records[dest.index()]
    }

    pub fn current_destination(&self) -> Destination {
        self.current
    }

    pub fn select(&mut self, dest: Destination) {
        self.current = dest;
    }

    pub fn current(&self) -> &AddressRecord {
        self.get(self.current)
    }

    pub fn current_mut(&mut self) -> &mut AddressRecord {
        self.get_mut(self.current)
    }

    /// Release every record's addresses
    pub fn free_all(&mut self) {
        for record in &mut self.records {
            record.free_addresses();
            record.reset_flags();
        }
    }
}
