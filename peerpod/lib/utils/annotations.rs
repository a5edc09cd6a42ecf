use std::{collections::HashMap, str::FromStr};

use getset::Getters;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The annotation carrying the pod name.
pub const SANDBOX_NAME_ANNOTATION: &str = "io.kubernetes.cri.sandbox-name";

/// The annotation carrying the pod namespace.
pub const SANDBOX_NAMESPACE_ANNOTATION: &str = "io.kubernetes.cri.sandbox-namespace";

/// The annotation carrying the requested number of vCPUs.
pub const DEFAULT_VCPUS_ANNOTATION: &str = "io.katacontainers.config.hypervisor.default_vcpus";

/// The annotation carrying the requested memory in MiB.
pub const DEFAULT_MEMORY_ANNOTATION: &str = "io.katacontainers.config.hypervisor.default_memory";

/// The annotation carrying an explicit instance type.
pub const MACHINE_TYPE_ANNOTATION: &str = "io.katacontainers.config.hypervisor.machine_type";

/// The annotation carrying a guest image override.
pub const IMAGE_ANNOTATION: &str = "io.katacontainers.config.hypervisor.image";

/// The annotation carrying the pod initdata document.
pub const INITDATA_ANNOTATION: &str = "io.katacontainers.config.runtime.cc_init_data";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The subset of pod sandbox annotations the orchestrator acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PodAnnotations {
    /// The pod name.
    pod_name: String,

    /// The pod namespace.
    pod_namespace: String,

    /// The requested number of vCPUs.
    vcpus: Option<u32>,

    /// The requested memory in MiB.
    memory_mib: Option<u32>,

    /// An explicit instance type.
    machine_type: Option<String>,

    /// A guest image override.
    image: Option<String>,

    /// The pod initdata document.
    initdata: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PodAnnotations {
    /// Extracts the recognized annotations. Unparseable numeric values are ignored.
    pub fn from_map(annotations: &HashMap<String, String>) -> Self {
        let text = |key: &str| {
            annotations
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            pod_name: text(SANDBOX_NAME_ANNOTATION).unwrap_or_default(),
            pod_namespace: text(SANDBOX_NAMESPACE_ANNOTATION).unwrap_or_default(),
            vcpus: parse_number(annotations, DEFAULT_VCPUS_ANNOTATION),
            memory_mib: parse_number(annotations, DEFAULT_MEMORY_ANNOTATION),
            machine_type: text(MACHINE_TYPE_ANNOTATION),
            image: text(IMAGE_ANNOTATION),
            initdata: annotations.get(INITDATA_ANNOTATION).cloned(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_number<T: FromStr>(annotations: &HashMap<String, String>, key: &str) -> Option<T> {
    let value = annotations.get(key)?;
    match value.trim().parse() {
        Ok(number) => Some(number),
        Err(_) => {
            tracing::warn!(annotation = key, value = %value, "ignoring unparseable annotation");
            None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
