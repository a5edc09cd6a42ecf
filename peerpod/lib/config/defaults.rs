//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default port the guest forwarder listens on for agent traffic.
pub const DEFAULT_FORWARDER_PORT: u16 = 15150;

/// The default guest port the secure tunnel connects to.
pub const DEFAULT_SECURE_COMMS_SSH_PORT: u16 = 2222;

/// The default bound on StartVM, in milliseconds.
pub const DEFAULT_PROXY_READY_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// The default bound on each individual StopVM cleanup step, in milliseconds.
pub const DEFAULT_TEARDOWN_STEP_TIMEOUT_MS: u64 = 60 * 1000;

/// The default prefix of generated instance names.
pub const DEFAULT_PODVM_NAME_PREFIX: &str = "podvm";

/// The default root directory for per-sandbox agent sockets.
pub const DEFAULT_PODS_DIR: &str = "/run/peerpod/pods";
