use crate::{
    core::{Kind, PubSubMessage},
    k8s,
    messaging::PubSub,
};
use anyhow::{bail, Result};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, reload, EnvFilter, Registry};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Replaces the process log filter at runtime.
#[derive(Clone, Debug)]
pub struct LogHandle(reload::Handle<EnvFilter, Registry>);

/// Applies the controller log level carried by the mesh config.
#[derive(Debug)]
pub struct LogLevelWatcher {
    handle: LogHandle,
    current: String,
}

/// Installs the global subscriber: an `EnvFilter` behind a reload layer,
/// formatted as plain text or JSON.
pub fn init(filter: &str, format: LogFormat) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(EnvFilter::try_new(filter)?);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Plain => registry.with(fmt::layer()).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(LogHandle(handle))
}

/// The filter directive for a mesh config log level. `disabled` turns
/// controller logging off.
fn directive(level: &str) -> Result<String> {
    let level = level.trim().to_ascii_lowercase();
    let level = match level.as_str() {
        "disabled" => LevelFilter::OFF,
        level => match LevelFilter::from_str(level) {
            Ok(level) => level,
            Err(_) => bail!("invalid log level {level:?}"),
        },
    };
    Ok(format!(
        "{}={},warn",
        crate::core::CONTROLLER_NAME.replace('-', "_"),
        level.to_string().to_ascii_lowercase()
    ))
}

// === impl LogHandle ===

impl LogHandle {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self(handle)
    }

    pub fn reload(&self, directive: &str) -> Result<()> {
        self.0.reload(EnvFilter::try_new(directive)?)?;
        Ok(())
    }
}

// === impl LogLevelWatcher ===

impl LogLevelWatcher {
    /// `initial` is the level of the mesh config at startup. It is not
    /// applied; the command-line filter stays in effect until it changes.
    pub fn new(handle: LogHandle, initial: &k8s::MeshConfigSpec) -> Self {
        Self {
            handle,
            current: initial.observability.log_level.clone(),
        }
    }

    pub async fn run(mut self, kube: Arc<PubSub>, shutdown: drain::Watch) {
        let mut sub = kube.subscribe(&[Kind::MeshConfigUpdated.as_str()]);
        let signaled = shutdown.signaled();
        tokio::pin!(signaled);

        let release = loop {
            tokio::select! {
                biased;
                release = &mut signaled => break Some(release),
                msg = sub.recv() => match msg {
                    Some(msg) => {
                        self.handle(&msg);
                    }
                    None => break None,
                },
            }
        };

        debug!("Stopping log level watcher");
        kube.unsubscribe(sub);
        drop(release);
    }

    /// Returns true if the filter was reloaded.
    fn handle(&mut self, msg: &PubSubMessage) -> bool {
        let Some(mc) = msg.new.as_ref().and_then(|o| o.as_mesh_config()) else {
            warn!(kind = %msg.kind, "Expected a MeshConfig");
            return false;
        };
        let level = &mc.spec.observability.log_level;
        if *level == self.current {
            return false;
        }
        self.current = level.clone();

        let directive = match directive(level) {
            Ok(directive) => directive,
            Err(error) => {
                warn!(%error, "Ignoring log level");
                return false;
            }
        };
        match self.handle.reload(&directive) {
            Ok(()) => {
                info!(%directive, "Updated log level");
                true
            }
            Err(error) => {
                warn!(%error, "Failed to update log level");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Object;
    use pretty_assertions::assert_eq;

    fn updated(level: &str) -> PubSubMessage {
        let mut spec = k8s::MeshConfigSpec::default();
        spec.observability.log_level = level.to_string();
        let mc = k8s::MeshConfig::new("fsm-mesh-config", spec);
        PubSubMessage::new(Kind::MeshConfigUpdated, None, Some(Object::from(mc)))
    }

    #[test]
    fn directives() {
        assert_eq!(directive("debug").unwrap(), "mesh_controller=debug,warn");
        assert_eq!(directive(" Trace ").unwrap(), "mesh_controller=trace,warn");
        assert_eq!(directive("disabled").unwrap(), "mesh_controller=off,warn");
        assert!(directive("verbose").is_err());
    }

    #[test]
    fn reloads_on_change() {
        let (layer, handle) = reload::Layer::new(EnvFilter::new("info"));
        let _subscriber = tracing_subscriber::registry().with(layer);

        let mut initial = k8s::MeshConfigSpec::default();
        initial.observability.log_level = "info".to_string();
        let mut watcher = LogLevelWatcher::new(LogHandle::new(handle.clone()), &initial);

        assert!(!watcher.handle(&updated("info")));
        assert!(watcher.handle(&updated("debug")));
        assert!(
            handle
                .with_current(|f| f.to_string().contains("mesh_controller=debug"))
                .unwrap()
        );
        assert!(!watcher.handle(&updated("debug")));

        // Unparseable levels leave the filter alone.
        assert!(!watcher.handle(&updated("loud")));
        assert!(
            handle
                .with_current(|f| f.to_string().contains("mesh_controller=debug"))
                .unwrap()
        );
        assert!(watcher.handle(&updated("error")));
    }
}
