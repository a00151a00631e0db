//! Program identity shared by every component that talks to the API server.

/// Name of the distribution. Used for user agents, secret names, annotation
/// prefixes and the cloud provider name.
pub const PROGRAM: &str = "k3s";

/// Version of this build.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the user agent string for a named controller.
///
/// The format is `<controller>/v<version> (<os>/<arch>) <program>`.
pub fn user_agent(controller_name: &str) -> String {
    format!(
        "{}/v{} ({}/{}) {}",
        controller_name,
        VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH,
        PROGRAM
    )
}
