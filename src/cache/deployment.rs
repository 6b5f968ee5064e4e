//! Deployment-mode checks.
//!
//! Caching is switched off in development deployments. The check runs on
//! every render so flipping the environment takes effect without a restart.

pub trait DeploymentCheck: Send + Sync {
    fn is_development(&self) -> bool;
}

/// Reads an environment variable on every call; the deployment counts as
/// development when the value starts with `development_prefix` or the
/// variable is unset.
#[derive(Debug, Clone)]
pub struct EnvDeployment {
    var: String,
    development_prefix: String,
}

impl EnvDeployment {
    pub fn new(var: impl Into<String>, development_prefix: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            development_prefix: development_prefix.into(),
        }
    }
}

impl DeploymentCheck for EnvDeployment {
    fn is_development(&self) -> bool {
        std::env::var(&self.var)
            .ok()
            .is_none_or(|value| value.starts_with(self.development_prefix.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDeployment {
    pub development: bool,
}

impl DeploymentCheck for FixedDeployment {
    fn is_development(&self) -> bool {
        self.development
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const VAR: &str = "HTMLCACHE_TEST_DEPLOYMENT";

    #[test]
    #[serial]
    fn env_deployment_is_evaluated_per_call() {
        let check = EnvDeployment::new(VAR, "localdev");

        // SAFETY: serialised with every other test touching this variable.
        unsafe { std::env::remove_var(VAR) };
        assert!(check.is_development(), "unset variable means development");

        unsafe { std::env::set_var(VAR, "localdev-laptop") };
        assert!(check.is_development());

        unsafe { std::env::set_var(VAR, "production") };
        assert!(!check.is_development());

        unsafe { std::env::remove_var(VAR) };
    }
}
