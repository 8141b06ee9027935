//! An in-memory informer cache fed by kubert watches.
//!
//! Each watched resource type is indexed by a [`ResourceIndex`], which
//! records the last-seen object and invokes the [`EventHandler`]s registered
//! for that type. The [`IntakeHandler`] turns those callbacks into broker
//! events, filtered to the namespaces the mesh monitors.
//!
//! [`EventHandler`]: mesh_controller_core::EventHandler

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod informers;
mod intake;

pub use self::{
    informers::{Informed, Informers, Monitor, ResourceIndex},
    intake::IntakeHandler,
};
