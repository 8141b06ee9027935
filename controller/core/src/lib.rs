#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod certificate;
pub mod informer;
mod kind;
mod message;
mod object;
pub mod repo;

pub use self::{
    certificate::{
        AccessCertStatusWriter, CertRole, CertificateSpec, CommonName, IssueOptions,
        IssuedCertificate, Issuer, SecretStore,
    },
    informer::{EventHandler, InformerCache, InformerKey, ObservePolicy},
    kind::{EventKinds, Kind, UnknownKind},
    message::PubSubMessage,
    object::Object,
    repo::{Batch, BatchItem, ConfigStore},
};

pub const CONTROLLER_NAME: &str = "mesh-controller";
