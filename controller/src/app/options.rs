//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::dispatcher;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Parsed settings file
    pub settings: Settings,

    /// Run the dispatchers; without them the action worker only drains
    pub enable_dispatcher: bool,

    /// Dispatcher worker options
    pub dispatcher: dispatcher::Options,
}

impl AppOptions {
    pub fn new(settings: Settings, layout: StorageLayout) -> Self {
        let dispatcher = dispatcher::Options {
            interval: Duration::from_secs(settings.dispatch.interval_secs.max(1)),
            ..Default::default()
        };
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            settings,
            enable_dispatcher: true,
            dispatcher,
        }
    }
}

/// Lifecycle options for the controller
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown; a running action is waited for
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(300),
        }
    }
}
