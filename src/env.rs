//! `${VAR}` expansion for configuration values
//!
//! Credentials are usually kept out of the config file and referenced as
//! `${SHARE_PASSWORD}` instead. Expansion happens once, while the raw
//! configuration is resolved.

use std::collections::BTreeSet;
use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

static VAR_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
});

/// Expand every `${NAME}` in `input` from the process environment.
///
/// Fails with the full list of unset variables rather than the first one.
pub fn expand(input: &str) -> Result<String, ConfigError> {
    expand_with(input, |name| env::var(name).ok())
}

/// Expand using an arbitrary lookup
pub fn expand_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut unset = BTreeSet::new();
    let expanded = VAR_REFERENCE.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            unset.insert(name.to_string());
            String::new()
        })
    });

    if unset.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            unset.into_iter().collect::<Vec<_>>().join(", ")
        )))
    }
}

/// Expand an optional value in place
pub fn expand_opt(value: Option<String>) -> Result<Option<String>, ConfigError> {
    value.map(|v| expand(&v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(expand_with("fileserver", vars(&[])).unwrap(), "fileserver");
        assert_eq!(
            expand_with("$HOME and {HOME}", vars(&[])).unwrap(),
            "$HOME and {HOME}"
        );
    }

    #[test]
    fn test_expands_repeated_references() {
        let lookup = vars(&[("USER_A", "alice"), ("DOMAIN", "corp")]);
        assert_eq!(
            expand_with("${DOMAIN}\\${USER_A}@${DOMAIN}", lookup).unwrap(),
            "corp\\alice@corp"
        );
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let err = expand_with("${PASS_ONE}:${PASS_TWO}:${PASS_ONE}", vars(&[])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("PASS_ONE, PASS_TWO"), "{}", message);
    }

    #[test]
    fn test_process_environment() {
        env::set_var("SHARE_STORAGE_TEST_SECRET", "hunter2");
        assert_eq!(
            expand_opt(Some("${SHARE_STORAGE_TEST_SECRET}".into())).unwrap(),
            Some("hunter2".to_string())
        );
        assert_eq!(expand_opt(None).unwrap(), None);
        env::remove_var("SHARE_STORAGE_TEST_SECRET");
    }
}
