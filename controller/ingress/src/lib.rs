//! Ingress and service route generation.
//!
//! Informer events are projected by change trackers into per-resource
//! changes, which are folded into canonical maps when routes are synced.
//! [`Cache::sync_routes`] joins the maps into the `registry.json` and
//! `ingress.json` artifacts and uploads each one whose content hash differs
//! from the last uploaded version. A [`BroadcastListener`] drives syncs from
//! the broker's ingress bus.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod endpoints;
mod hash;
mod import;
mod ingress;
mod listener;
pub mod route;
mod service;
mod service_port;
mod tracker;

#[cfg(test)]
mod test_util;

pub use self::{
    cache::{Cache, CacheConfig, SyncRoutes},
    endpoints::{EndpointsMap, EndpointsProjection},
    hash::content_hash,
    import::{ImportMap, ImportTracker, ImportedEndpoints, ImportedServices, MultiClusterEndpointsMap},
    ingress::{annotations, IngressClassConfig, IngressMap, Ingresses, Route, RouteKey},
    listener::{announce, BroadcastListener, DEFAULT_SLIDING},
    service::{ServiceMap, Services},
    service_port::{Endpoint, ServiceInfo, ServicePortName, ServiceType},
    tracker::{ApplyOrder, CanonicalMap, Change, ChangeTracker, Projection},
};
