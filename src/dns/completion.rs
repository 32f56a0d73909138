//! Lookup completions and their effect on address records

use crate::addr::{AddressFamily, AddressRecord, Destination};
use std::net::IpAddr;
use tracing::{info, warn};

/// Identifies one lookup on the resolver channel
pub type LookupId = u64;

/// Outcome of a single lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStatus {
    /// Addresses found. The receiver must copy them; the buffer stays with
    /// the completion.
    Resolved {
        addresses: Vec<IpAddr>,
        family: AddressFamily,
    },
    /// Nameserver refused the connection
    Refused,
    /// No answer in time
    Timeout,
    /// Cancelled by a channel teardown
    Cancelled,
    /// Channel went away before this completion was consumed
    Destroyed,
    /// Any other failure (no such name, malformed answer, ...)
    Failed(String),
}

impl LookupStatus {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LookupStatus::Refused | LookupStatus::Timeout | LookupStatus::Cancelled
        )
    }
}

/// A finished lookup, as delivered to the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: LookupId,
    pub destination: Destination,
    pub status: LookupStatus,
}

/// What a completion did to its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEffect {
    /// Record now holds this many addresses
    Resolved(usize),
    /// Refused, timed out or cancelled; a retry is pending
    Transient,
    /// Stale completion from a torn-down channel
    Destroyed,
    /// Nothing changed
    Unhandled,
}

/// Sticky retry signal plus a count of transient failures.
///
/// The flag stays set until the control loop consumes it with
/// [`RetryState::take_pending`]. The counter runs until the next successful
/// resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pending: bool,
    count: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transient(&mut self) {
        self.pending = true;
        self.count += 1;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Transient failures since the last successful resolution
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Consume the retry flag
    pub fn take_pending(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    fn reset_count(&mut self) {
        self.count = 0;
    }
}

/// Apply a lookup status to the record it was issued for
pub fn apply_completion(
    record: &mut AddressRecord,
    status: &LookupStatus,
    retry: &mut RetryState,
) -> CompletionEffect {
    let dest = record.destination();

    match status {
        LookupStatus::Resolved { addresses, family } if !addresses.is_empty() => {
            info!(
                "{}: got {} {} address(es) for {}",
                dest,
                addresses.len(),
                family,
                record.hostname
            );
            for (i, addr) in addresses.iter().enumerate() {
                info!("{}: addr{}: {}", dest, i, addr);
            }
            record.populate(addresses, *family);
            retry.reset_count();
            CompletionEffect::Resolved(addresses.len())
        }
        LookupStatus::Resolved { .. } => {
            info!("{}: lookup returned no addresses", dest);
            CompletionEffect::Unhandled
        }
        LookupStatus::Destroyed => {
            info!("{}: resolver channel was destroyed", dest);
            CompletionEffect::Destroyed
        }
        LookupStatus::Refused | LookupStatus::Timeout | LookupStatus::Cancelled => {
            retry.record_transient();
            warn!(
                "{}: transient resolution failure ({:?}), retry count {}",
                dest,
                status,
                retry.count()
            );
            CompletionEffect::Transient
        }
        LookupStatus::Failed(reason) => {
            info!("{}: didn't get address: {}", dest, reason);
            CompletionEffect::Unhandled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn record() -> AddressRecord {
        AddressRecord::from_resource(Destination::Redirector, "ssl:r.example.com:443")
    }

    #[test]
    fn test_resolved_populates_record() {
        let mut rec = record();
        let mut retry = RetryState::new();
        retry.record_transient();

        let mut addresses = vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
        ];
        let status = LookupStatus::Resolved {
            addresses: addresses.clone(),
            family: AddressFamily::Ipv4,
        };

        let effect = apply_completion(&mut rec, &status, &mut retry);
        assert_eq!(effect, CompletionEffect::Resolved(3));
        assert!(rec.is_resolved());
        assert_eq!(rec.cursor(), 0);
        assert_eq!(rec.addresses().len(), 3);
        assert_eq!(retry.count(), 0);

        // the completion's buffer is not shared with the record
        drop(status);
        addresses[0] = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(rec.current(), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[test]
    fn test_timeout_records_retry() {
        let mut rec = record();
        let mut retry = RetryState::new();

        let effect = apply_completion(&mut rec, &LookupStatus::Timeout, &mut retry);
        assert_eq!(effect, CompletionEffect::Transient);
        assert!(!rec.is_resolved());
        assert!(retry.is_pending());
        assert_eq!(retry.count(), 1);
    }

    #[test]
    fn test_transient_statuses() {
        let mut rec = record();
        let mut retry = RetryState::new();

        for status in [LookupStatus::Refused, LookupStatus::Cancelled, LookupStatus::Timeout] {
            assert!(status.is_transient());
            apply_completion(&mut rec, &status, &mut retry);
        }
        assert_eq!(retry.count(), 3);

        assert!(retry.take_pending());
        assert!(!retry.take_pending());
        assert_eq!(retry.count(), 3);
    }

    #[test]
    fn test_destroyed_and_failed_change_nothing() {
        let mut rec = record();
        let mut retry = RetryState::new();

        let effect = apply_completion(&mut rec, &LookupStatus::Destroyed, &mut retry);
        assert_eq!(effect, CompletionEffect::Destroyed);

        let effect = apply_completion(
            &mut rec,
            &LookupStatus::Failed("NXDOMAIN".into()),
            &mut retry,
        );
        assert_eq!(effect, CompletionEffect::Unhandled);

        assert!(!rec.is_resolved());
        assert!(rec.addresses().is_empty());
        assert_eq!(retry, RetryState::new());
    }

    #[test]
    fn test_empty_resolution_is_unhandled() {
        let mut rec = record();
        let mut retry = RetryState::new();
        let status = LookupStatus::Resolved {
            addresses: Vec::new(),
            family: AddressFamily::Ipv4,
        };

        assert_eq!(
            apply_completion(&mut rec, &status, &mut retry),
            CompletionEffect::Unhandled
        );
        assert!(!rec.is_resolved());
    }
}
