//! Orchestrator configuration validation

use crate::{PeerpodError, PeerpodResult};

use super::OrchestratorConfig;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OrchestratorConfig {
    /// Validates the configuration, collecting every problem found.
    ///
    /// This checks for:
    /// - An empty pods directory
    /// - Zero ports and zero timeouts
    /// - Trustee key brokering without secure comms or without a key broker address
    pub fn validate(&self) -> PeerpodResult<()> {
        let mut errors = Vec::new();

        if self.pods_dir.as_os_str().is_empty() {
            errors.push("pods_dir must not be empty".to_string());
        }

        if self.forwarder_port == 0 {
            errors.push("forwarder_port must not be zero".to_string());
        }

        if self.secure_comms_ssh_port == 0 {
            errors.push("secure_comms_ssh_port must not be zero".to_string());
        }

        if self.proxy_ready_timeout_ms == 0 {
            errors.push("proxy_ready_timeout_ms must not be zero".to_string());
        }

        if self.teardown_step_timeout_ms == 0 {
            errors.push("teardown_step_timeout_ms must not be zero".to_string());
        }

        if self.secure_comms_trustee {
            if !self.secure_comms {
                errors.push("secure_comms_trustee requires secure_comms".to_string());
            }

            match &self.secure_comms_kbs_address {
                Some(address) if !address.trim().is_empty() => {}
                _ => errors
                    .push("secure_comms_trustee requires secure_comms_kbs_address".to_string()),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PeerpodError::ConfigValidationErrors(errors))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_minimal_config() {
        let config = OrchestratorConfig::builder().pods_dir("/tmp/pods").build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_trustee_requirements() {
        let config = OrchestratorConfig::builder()
            .pods_dir("/tmp/pods")
            .secure_comms(true)
            .secure_comms_trustee(true)
            .build();

        let Err(PeerpodError::ConfigValidationErrors(errors)) = config.validate() else {
            panic!("trustee without a kbs address should be rejected");
        };
        assert_eq!(
            errors,
            vec!["secure_comms_trustee requires secure_comms_kbs_address".to_string()]
        );

        let config = OrchestratorConfig::builder()
            .pods_dir("/tmp/pods")
            .secure_comms(true)
            .secure_comms_trustee(true)
            .secure_comms_kbs_address("127.0.0.1:8080")
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = OrchestratorConfig::builder()
            .pods_dir("")
            .forwarder_port(0)
            .proxy_ready_timeout_ms(0)
            .teardown_step_timeout_ms(0)
            .build();

        let Err(PeerpodError::ConfigValidationErrors(errors)) = config.validate() else {
            panic!("invalid config should be rejected");
        };
        assert_eq!(errors.len(), 4);
    }
}
