use std::path::{Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file name of the agent socket inside a sandbox directory.
pub const AGENT_SOCKET_NAME: &str = "agent.ttrpc";

/// The guest path of the forwarder daemon configuration.
pub const GUEST_DAEMON_CONFIG_PATH: &str = "/run/peerpod/daemon.json";

/// The guest path of the pod initdata document.
pub const GUEST_INITDATA_PATH: &str = "/run/peerpod/initdata";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the directory that holds a sandbox's local resources.
pub fn sandbox_dir(pods_dir: impl AsRef<Path>, sandbox_id: &str) -> PathBuf {
    pods_dir.as_ref().join(sandbox_id)
}

/// Returns the path the agent proxy of a sandbox listens on.
///
/// The path is `<pods_dir>/<sandbox_id>/agent.ttrpc`; it only stays inside `pods_dir` for
/// sandbox IDs accepted by [`validate_sandbox_id`](super::validate_sandbox_id).
pub fn agent_socket_path(pods_dir: impl AsRef<Path>, sandbox_id: &str) -> PathBuf {
    sandbox_dir(pods_dir, sandbox_id).join(AGENT_SOCKET_NAME)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
