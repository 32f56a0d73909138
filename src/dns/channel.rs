//! The shared resolver channel
//!
//! One channel serves every destination. Lookups are spawned onto the tokio
//! runtime and report back through an unbounded completion queue that the
//! owning event loop drains. The channel can only be rebuilt while nothing is
//! in flight.

use super::backend::{BackendBuilder, LookupBackend};
use super::completion::{Completion, LookupId, LookupStatus};
use crate::addr::{AddressFamily, Destination};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

struct Outstanding {
    destination: Destination,
    abort: AbortHandle,
}

pub struct ResolverChannel {
    builder: Arc<dyn BackendBuilder>,
    backend: Option<Arc<dyn LookupBackend>>,
    outstanding: HashMap<LookupId, Outstanding>,
    next_id: LookupId,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ResolverChannel {
    pub fn new(
        builder: Arc<dyn BackendBuilder>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        ResolverChannel {
            builder,
            backend: None,
            outstanding: HashMap::new(),
            next_id: 1,
            completions,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Lookups issued and not yet completed
    pub fn busy_count(&self) -> usize {
        self.outstanding.len()
    }

    /// (Re)build the channel.
    ///
    /// Refused while lookups are outstanding, since a rebuild would orphan
    /// them. A backend that fails to build leaves the channel uninitialized.
    pub fn start(&mut self) -> Result<()> {
        info!("resolver: channel initialized = {}", self.is_initialized());

        let busy = self.busy_count();
        if busy > 0 {
            warn!("resolver: {} lookups still busy, skip creating new channel", busy);
            return Err(Error::ChannelBusy(busy));
        }

        match self.builder.build() {
            Ok(backend) => self.backend = Some(backend),
            Err(e) => {
                warn!("resolver: failed to build channel: {}", e);
                self.backend = None;
            }
        }
        Ok(())
    }

    /// Issue a lookup without waiting for it. Must be called from within a
    /// tokio runtime.
    pub fn lookup(
        &mut self,
        destination: Destination,
        host: &str,
        family: AddressFamily,
    ) -> Result<LookupId> {
        let backend = self.backend.as_ref().ok_or(Error::ChannelUninitialized)?;

        let id = self.next_id;
        self.next_id += 1;

        let lookup = backend.lookup(host, family);
        let tx = self.completions.clone();
        let task = tokio::spawn(async move {
            let status = lookup.await;
            // receiver gone means the agent is shutting down
            let _ = tx.send(Completion {
                id,
                destination,
                status,
            });
        });

        debug!("resolver: lookup {} issued for {} ({})", id, host, family);
        self.outstanding.insert(
            id,
            Outstanding {
                destination,
                abort: task.abort_handle(),
            },
        );
        Ok(id)
    }

    /// Retire a delivered completion. Completions the channel no longer
    /// tracks belong to a torn-down channel and come back as `Destroyed`.
    pub fn accept(&mut self, completion: Completion) -> Completion {
        if self.outstanding.remove(&completion.id).is_some() {
            return completion;
        }
        debug!(
            "resolver: stale completion {} for {} ({:?})",
            completion.id, completion.destination, completion.status
        );
        Completion {
            status: LookupStatus::Destroyed,
            ..completion
        }
    }

    /// Tear the channel down unconditionally. Every outstanding lookup is
    /// aborted and handed back as a `Cancelled` completion.
    pub fn force_stop(&mut self) -> Vec<Completion> {
        self.backend = None;

        let mut cancelled: Vec<Completion> = self
            .outstanding
            .drain()
            .map(|(id, outstanding)| {
                outstanding.abort.abort();
                Completion {
                    id,
                    destination: outstanding.destination,
                    status: LookupStatus::Cancelled,
                }
            })
            .collect();
        cancelled.sort_by_key(|c| c.id);

        info!("resolver: channel stopped, {} lookups cancelled", cancelled.len());
        cancelled
    }
}

impl Drop for ResolverChannel {
    fn drop(&mut self) {
        for outstanding in self.outstanding.values() {
            outstanding.abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::backend::Lookup;
    use futures::future;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `stall.example` never, everything else with 10.0.0.1
    struct TestBackend;

    impl LookupBackend for TestBackend {
        fn lookup(&self, host: &str, family: AddressFamily) -> Lookup {
            if host == "stall.example" {
                return Box::pin(future::pending());
            }
            Box::pin(future::ready(LookupStatus::Resolved {
                addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))],
                family,
            }))
        }
    }

    fn channel() -> (ResolverChannel, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let builder: Arc<dyn BackendBuilder> =
            Arc::new(|| -> Result<Arc<dyn LookupBackend>> { Ok(Arc::new(TestBackend)) });
        (ResolverChannel::new(builder, tx), rx)
    }

    #[tokio::test]
    async fn test_lookup_requires_start() {
        let (mut chan, _rx) = channel();
        assert!(!chan.is_initialized());
        assert!(matches!(
            chan.lookup(Destination::Manager, "m.example", AddressFamily::Ipv4),
            Err(Error::ChannelUninitialized)
        ));
    }

    #[tokio::test]
    async fn test_lookup_completes_and_retires() {
        let (mut chan, mut rx) = channel();
        chan.start().unwrap();

        let id = chan
            .lookup(Destination::Manager, "m.example", AddressFamily::Ipv4)
            .unwrap();
        assert_eq!(chan.busy_count(), 1);

        let completion = chan.accept(rx.recv().await.unwrap());
        assert_eq!(completion.id, id);
        assert_eq!(completion.destination, Destination::Manager);
        assert!(matches!(completion.status, LookupStatus::Resolved { .. }));
        assert_eq!(chan.busy_count(), 0);
    }

    #[tokio::test]
    async fn test_start_refused_while_busy() {
        let (mut chan, _rx) = channel();
        chan.start().unwrap();
        chan.lookup(Destination::Redirector, "stall.example", AddressFamily::Ipv4)
            .unwrap();

        assert!(matches!(chan.start(), Err(Error::ChannelBusy(1))));
        assert!(chan.is_initialized());
    }

    #[tokio::test]
    async fn test_force_stop_cancels_everything() {
        let (mut chan, mut rx) = channel();
        chan.start().unwrap();
        let a = chan
            .lookup(Destination::Redirector, "stall.example", AddressFamily::Ipv4)
            .unwrap();
        let b = chan
            .lookup(Destination::Manager, "stall.example", AddressFamily::Ipv4)
            .unwrap();

        let cancelled = chan.force_stop();
        assert_eq!(cancelled.len(), 2);
        assert_eq!(cancelled[0].id, a);
        assert_eq!(cancelled[1].id, b);
        assert!(cancelled.iter().all(|c| c.status == LookupStatus::Cancelled));
        assert_eq!(chan.busy_count(), 0);
        assert!(!chan.is_initialized());

        // aborted lookups never report
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        // rebuild is allowed again
        chan.start().unwrap();
        assert!(chan.is_initialized());
    }

    #[tokio::test]
    async fn test_stale_completion_is_destroyed() {
        let (mut chan, mut rx) = channel();
        chan.start().unwrap();
        chan.lookup(Destination::Manager, "m.example", AddressFamily::Ipv4)
            .unwrap();

        // the lookup finishes before the teardown is noticed
        let delivered = rx.recv().await.unwrap();
        let cancelled = chan.force_stop();
        assert_eq!(cancelled.len(), 1);

        let stale = chan.accept(delivered);
        assert_eq!(stale.status, LookupStatus::Destroyed);
    }

    #[tokio::test]
    async fn test_failed_build_leaves_uninitialized() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let builder: Arc<dyn BackendBuilder> = Arc::new(move || -> Result<Arc<dyn LookupBackend>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::dns("no nameserver"))
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut chan = ResolverChannel::new(builder, tx);

        assert!(chan.start().is_ok());
        assert!(!chan.is_initialized());
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
