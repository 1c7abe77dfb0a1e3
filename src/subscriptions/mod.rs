//! Subscription registry with un-class escalation.

mod registry;

pub use registry::{
    RegistryOptions, SubTriple, Subscription, SubscriptionRegistry,
};
