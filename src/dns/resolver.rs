//! Destination resolver
//!
//! Ties the resolver channel, the address book and the target sink together.
//! Every method runs on the single event loop that owns the resolver; nothing
//! here blocks on the network.

use super::backend::{BackendBuilder, HickoryBuilder};
use super::channel::ResolverChannel;
use super::completion::{apply_completion, Completion, CompletionEffect, LookupId, RetryState};
use crate::addr::{self, AddressBook, AddressFamily, Destination, FileTargetSink, TargetSink};
use crate::config::Config;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct Resolver {
    channel: ResolverChannel,
    completions: mpsc::UnboundedReceiver<Completion>,
    book: AddressBook,
    retry: RetryState,
    sink: Box<dyn TargetSink>,
}

impl Resolver {
    pub fn new(
        builder: Arc<dyn BackendBuilder>,
        book: AddressBook,
        sink: Box<dyn TargetSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Resolver {
            channel: ResolverChannel::new(builder, tx),
            completions: rx,
            book,
            retry: RetryState::new(),
            sink,
        }
    }

    /// hickory-dns lookups, records from the configured resources and a file
    /// sink at `target-file`
    pub fn from_config(config: &Config) -> Self {
        Resolver::new(
            Arc::new(HickoryBuilder::new(config.dns.clone())),
            AddressBook::from_config(config),
            Box::new(FileTargetSink::new(&config.target_file)),
        )
    }

    /// Start resolving a destination's hostname over IPv4.
    ///
    /// Returns once the lookup is issued; the outcome arrives as a
    /// [`Completion`].
    pub fn resolve(&mut self, dest: Destination) -> Result<LookupId> {
        // AAAA lookups stay off until the controller side is reachable over IPv6
        self.dispatch(dest, AddressFamily::Ipv4)
    }

    /// Start resolving a destination's hostname for an explicit family
    pub fn dispatch(&mut self, dest: Destination, family: AddressFamily) -> Result<LookupId> {
        let record = self.book.get_mut(dest);
        record.reset_flags();

        if !record.is_valid() {
            return Err(Error::ConfigurationInvalid(dest.to_string()));
        }

        info!("resolver: resolving '{}' for {}", record.hostname, dest);

        self.channel.start()?;

        let record = self.book.get_mut(dest);
        record.free_addresses();

        if !self.channel.is_initialized() {
            info!("resolver: channel not initialized yet");
            return Err(Error::ChannelUninitialized);
        }

        let host = record.hostname.clone();
        self.channel.lookup(dest, &host, family)
    }

    /// Wait for the next completion
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions.recv().await
    }

    /// Next completion if one is already queued
    pub fn try_next_completion(&mut self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Route a completion to its destination's record
    pub fn on_completion(&mut self, completion: Completion) -> CompletionEffect {
        let completion = self.channel.accept(completion);
        debug!(
            "resolver: completion {} for {}: {:?}",
            completion.id, completion.destination, completion.status
        );
        let record = self.book.get_mut(completion.destination);
        apply_completion(record, &completion.status, &mut self.retry)
    }

    /// No completion arrived in time: tear the channel down and run every
    /// outstanding lookup's completion as cancelled. Returns how many were
    /// cancelled.
    pub fn resolve_timeout(&mut self) -> usize {
        info!("resolver: timeout calling");
        let cancelled = self.channel.force_stop();
        let count = cancelled.len();
        for completion in cancelled {
            let record = self.book.get_mut(completion.destination);
            apply_completion(record, &completion.status, &mut self.retry);
        }
        count
    }

    /// Publish the current destination's selected address
    pub fn write_current_target(&mut self) -> Result<String> {
        let record = self.book.current();
        addr::write_current(record, self.sink.as_mut())
    }

    /// Fail over to the current destination's next address
    pub fn write_next_target(&mut self) -> Result<String> {
        let record = self.book.current_mut();
        addr::write_next(record, self.sink.as_mut())
    }

    /// Tear everything down and release all addresses
    pub fn shutdown(&mut self) {
        self.resolve_timeout();
        self.book.free_all();
        while self.completions.try_recv().is_ok() {}
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut AddressBook {
        &mut self.book
    }

    pub fn channel(&self) -> &ResolverChannel {
        &self.channel
    }

    pub fn retry(&self) -> &RetryState {
        &self.retry
    }

    /// Consume the sticky retry flag
    pub fn take_retry(&mut self) -> bool {
        self.retry.take_pending()
    }
}
