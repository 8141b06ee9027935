#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_controller_certificate as certificate;
pub use mesh_controller_core as core;
pub use mesh_controller_ingress as ingress;
pub use mesh_controller_k8s_api as k8s;
pub use mesh_controller_k8s_index as index;
pub use mesh_controller_k8s_status as status;
pub use mesh_controller_messaging as messaging;

mod args;
mod logging;

pub use self::{
    args::Args,
    logging::{LogFormat, LogHandle, LogLevelWatcher},
};
