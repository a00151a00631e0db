//! Errors raised while constructing and registering providers.

use thiserror::Error;

/// Failure to construct a provider from its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration turns off everything the provider offers.
    #[error("all cloud-provider functionality disabled by config")]
    Disabled,

    /// The configuration is not valid JSON for this provider.
    #[error("unable to parse cloud provider config: {0}")]
    Unmarshal(#[from] serde_json::Error),

    /// The configuration could not be read.
    #[error("unable to read cloud provider config: {0}")]
    Read(#[from] std::io::Error),
}

/// Failure to register or look up a provider.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A provider is already registered under this name.
    #[error("cloud provider {0:?} was registered twice")]
    Duplicate(String),

    /// No provider is registered under this name.
    #[error("unknown cloud provider {0:?}")]
    Unknown(String),

    /// The provider refused its configuration.
    #[error("could not construct cloud provider {name:?}: {source}")]
    Config {
        /// Provider name
        name: String,
        /// Why construction failed
        #[source]
        source: ConfigError,
    },
}
