//! Connection target formatting and publication

use super::{AddressFamily, AddressRecord, Destination};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// External store the connection-establishment layer reads its target from
pub trait TargetSink: Send {
    fn publish(&mut self, destination: Destination, target: &str) -> Result<()>;
}

/// A published target as stored by the sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedTarget {
    pub target: String,
    pub destination: Destination,
    pub updated_at: DateTime<Utc>,
}

impl PublishedTarget {
    fn new(destination: Destination, target: &str) -> Self {
        PublishedTarget {
            target: target.to_string(),
            destination,
            updated_at: Utc::now(),
        }
    }
}

/// Format the address under the record's cursor.
///
/// IPv4 yields `proto:host:port`, IPv6 yields `proto:[host]:port`.
pub fn format_target(record: &AddressRecord) -> Result<String> {
    let dest = record.destination();

    if record.addresses().is_empty() {
        return Err(Error::unavailable(format!("{}: address list is empty", dest)));
    }
    let ip = record.current().ok_or_else(|| {
        Error::unavailable(format!(
            "{}: cursor {} past {} addresses",
            dest,
            record.cursor(),
            record.addresses().len()
        ))
    })?;

    let family = record
        .family()
        .ok_or_else(|| Error::format(format!("{}: address family unknown", dest)))?;
    match (family, ip) {
        (AddressFamily::Ipv4, IpAddr::V4(v4)) => {
            Ok(format!("{}:{}:{}", record.proto, v4, record.port))
        }
        (AddressFamily::Ipv6, IpAddr::V6(v6)) => {
            Ok(format!("{}:[{}]:{}", record.proto, v6, record.port))
        }
        _ => Err(Error::format(format!(
            "{}: address {} is not {}",
            dest, ip, family
        ))),
    }
}

/// Publish the target under the cursor
pub fn write_current(record: &AddressRecord, sink: &mut dyn TargetSink) -> Result<String> {
    let target = format_target(record)?;
    sink.publish(record.destination(), &target)?;
    info!("trying to connect to: {} : {}", record.destination(), target);
    Ok(target)
}

/// Advance the cursor once and publish. Past the end of the list this keeps
/// failing with `AddressUnavailable` until the record is resolved again.
pub fn write_next(record: &mut AddressRecord, sink: &mut dyn TargetSink) -> Result<String> {
    record.advance();
    write_current(record, sink)
}

/// Writes the target as a JSON document, replacing the file atomically
#[derive(Debug, Clone)]
pub struct FileTargetSink {
    path: PathBuf,
}

impl FileTargetSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileTargetSink {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last published target
    pub fn read(&self) -> Result<PublishedTarget> {
        let content = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

impl TargetSink for FileTargetSink {
    fn publish(&mut self, destination: Destination, target: &str) -> Result<()> {
        let doc = PublishedTarget::new(destination, target);
        let content = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process sink; clones share the same history
#[derive(Debug, Clone, Default)]
pub struct MemoryTargetSink {
    published: Arc<Mutex<Vec<PublishedTarget>>>,
}

impl MemoryTargetSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().iter().map(|p| p.target.clone()).collect()
    }

    pub fn last(&self) -> Option<PublishedTarget> {
        self.published.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl TargetSink for MemoryTargetSink {
    fn publish(&mut self, destination: Destination, target: &str) -> Result<()> {
        self.published
            .lock()
            .push(PublishedTarget::new(destination, target));
        Ok(())
    }
}
