use anyhow::Result;
use regex::Regex;
use std::env;
use tracing::{debug, warn};

const ENV_PLACEHOLDER: &str = r"\$\{(\w+)\}|\$(\w+)";

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(ENV_PLACEHOLDER)?;
    let mut result = content.to_string();
    let mut missing_vars = Vec::new();

    for caps in re.captures_iter(content) {
        let (Some(var), Some(placeholder)) = (caps.get(1).or(caps.get(2)), caps.get(0)) else {
            continue;
        };
        let var_name = var.as_str();

        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                result = result.replace(placeholder.as_str(), &value);
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                // Placeholder stays; the validator reports it
            }
        }
    }

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may use defaults or fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result)
}

/// Get environment variable with a default value
pub fn get_env_or_default(var_name: &str, default: &str) -> String {
    match env::var(var_name) {
        Ok(value) => value,
        Err(_) => {
            debug!(
                "Environment variable '{}' not set, using default: \"{}\"",
                var_name, default
            );
            default.to_string()
        }
    }
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    Regex::new(ENV_PLACEHOLDER)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_known_vars() {
        env::set_var("TICKCACHE_TEST_TOKEN", "abc123");
        let out = substitute_env_vars("token: ${TICKCACHE_TEST_TOKEN}").unwrap();
        assert_eq!(out, "token: abc123");
    }

    #[test]
    fn test_keeps_unknown_placeholders() {
        let out = substitute_env_vars("token: ${TICKCACHE_SURELY_UNSET_VAR}").unwrap();
        assert!(has_unresolved_env_vars(&out));
    }
}
