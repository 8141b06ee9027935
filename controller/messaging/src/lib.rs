//! The event broker.
//!
//! Observation events enter through [`Broker::publish`] and are drained from a
//! de-duplicating, rate-limited [`WorkQueue`]. Each event is published on the
//! kube bus under its kind and classified into the proxy, ingress and gateway
//! refresh domains. Domain refreshes are coalesced over a sliding window
//! before being announced on the domain's bus.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod broker;
mod coalescer;
mod dispatch;
mod metrics;
mod pubsub;
mod queue;

pub use self::{
    broker::{Broker, Bus},
    coalescer::{Domain, Window},
    dispatch::ProxyTopic,
    metrics::BrokerMetrics,
    pubsub::{PubSub, Subscription, DEFAULT_CAPACITY},
    queue::WorkQueue,
};
