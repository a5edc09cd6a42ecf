use crate::{PeerpodError, PeerpodResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The maximum length of a generated instance name.
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

/// How many leading characters of the sandbox ID go into an instance name.
const SANDBOX_ID_NAME_CHARS: usize = 8;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that a sandbox ID can be used as a single path component.
///
/// IDs must be non-empty, must not be `.` or `..`, and must not contain `/` or NUL.
pub fn validate_sandbox_id(sandbox_id: &str) -> PeerpodResult<()> {
    let invalid = sandbox_id.is_empty()
        || sandbox_id == "."
        || sandbox_id == ".."
        || sandbox_id.contains(|c: char| c == '/' || c == '\0');

    if invalid {
        return Err(PeerpodError::InvalidSandboxId(sandbox_id.to_string()));
    }

    Ok(())
}

/// Generates the instance name for a sandbox.
///
/// The format is `{prefix}-{pod_name}-{first 8 chars of sandbox_id}`, lowercased, with every
/// character outside `[a-z0-9-]` replaced by `-`, capped at [`MAX_INSTANCE_NAME_LEN`].
pub fn generate_instance_name(prefix: &str, pod_name: &str, sandbox_id: &str) -> String {
    let short_id: String = sandbox_id.chars().take(SANDBOX_ID_NAME_CHARS).collect();

    let raw = [prefix, pod_name, &short_id]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-");

    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .take(MAX_INSTANCE_NAME_LEN)
        .collect();

    while name.ends_with('-') {
        name.pop();
    }

    name
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
