//! Hostname resolution for connection destinations

mod backend;
mod channel;
mod completion;
mod resolver;

pub use backend::{BackendBuilder, HickoryBackend, HickoryBuilder, Lookup, LookupBackend};
pub use channel::ResolverChannel;
pub use completion::{
    apply_completion, Completion, CompletionEffect, LookupId, LookupStatus, RetryState,
};
pub use resolver::Resolver;
