//! Certificate lifecycle reconciliation.
//!
//! The [`Reconciler`] issues the ingress-gateway certificate named by the mesh
//! config and the certificates requested by `AccessCert` resources, stores
//! them as TLS secrets, and re-stores them when the issuer rotates them.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod reconciler;

pub use self::{
    error::{Error, ErrorKind},
    reconciler::Reconciler,
};
