//! Environment expansion chain and sensitive per-invocation overrides.
//!
//! Hosts hand bodies an [`EnvironmentExpander`] rather than a finished map:
//! the expander is applied to whatever base environment the host builds when
//! the body actually runs. [`merge`] layers a step's override on top of the
//! ambient expander inherited from enclosing steps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ExpandError;

/// Ordered environment variable map mutated by expanders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars {
    vars: BTreeMap<String, String>,
}

impl EnvVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any previous binding.
    ///
    /// An empty value removes the variable.
    pub fn override_var(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.vars.remove(key);
        } else {
            self.vars.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A link in the environment expansion chain.
pub trait EnvironmentExpander: Send + Sync + fmt::Debug {
    /// Apply this expander's bindings to `env`.
    fn expand(&self, env: &mut EnvVars) -> Result<(), ExpandError>;
}

/// Variable overrides whose values are held as secrets.
///
/// Values stay wrapped until [`EnvironmentExpander::expand`] writes them into
/// the body's environment; `Debug` and [`EnvironmentOverride::masked`] never
/// show them.
#[derive(Default)]
pub struct EnvironmentOverride {
    overrides: IndexMap<String, SecretString>,
}

impl EnvironmentOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override with a single binding.
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut overrides = Self::new();
        overrides.insert(name, value);
        overrides
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.overrides
            .insert(name.into(), SecretString::from(value.into()));
    }

    /// Variable names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.overrides.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// `NAME=****` pairs, safe for logs.
    pub fn masked(&self) -> String {
        self.names()
            .map(|name| format!("{name}=****"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for EnvironmentOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentOverride")
            .field("overrides", &self.masked())
            .finish()
    }
}

impl EnvironmentExpander for EnvironmentOverride {
    fn expand(&self, env: &mut EnvVars) -> Result<(), ExpandError> {
        for (name, value) in &self.overrides {
            if name.is_empty() || name.contains('=') {
                return Err(ExpandError::InvalidName(name.clone()));
            }
            env.override_var(name, value.expose_secret());
        }
        Ok(())
    }
}

/// Two expanders applied in order: `original` first, then `subsequent`.
#[derive(Debug)]
struct MergedExpander {
    original: Arc<dyn EnvironmentExpander>,
    subsequent: Arc<dyn EnvironmentExpander>,
}

impl EnvironmentExpander for MergedExpander {
    fn expand(&self, env: &mut EnvVars) -> Result<(), ExpandError> {
        self.original.expand(env)?;
        self.subsequent.expand(env)
    }
}

/// Layer `subsequent` on top of an optional ambient expander.
pub fn merge(
    original: Option<Arc<dyn EnvironmentExpander>>,
    subsequent: Arc<dyn EnvironmentExpander>,
) -> Arc<dyn EnvironmentExpander> {
    match original {
        Some(original) => Arc::new(MergedExpander {
            original,
            subsequent,
        }),
        None => subsequent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(&'static str, &'static str);

    impl EnvironmentExpander for Fixed {
        fn expand(&self, env: &mut EnvVars) -> Result<(), ExpandError> {
            env.override_var(self.0, self.1);
            Ok(())
        }
    }

    #[test]
    fn test_override_expands_plaintext() {
        let overrides = EnvironmentOverride::single("changePath", "src/lib.rs");
        let mut env = EnvVars::new();
        overrides.expand(&mut env).expect("expand");
        assert_eq!(env.get("changePath"), Some("src/lib.rs"));
    }

    #[test]
    fn test_override_debug_is_redacted() {
        let overrides = EnvironmentOverride::single("changePath", "secret/file.txt");
        let debug = format!("{:?}", overrides);
        assert!(!debug.contains("secret/file.txt"));
        assert!(debug.contains("changePath=****"));
        assert_eq!(overrides.masked(), "changePath=****");
    }

    #[test]
    fn test_empty_value_removes_variable() {
        let mut env: EnvVars = [("A", "1")].into_iter().collect();
        env.override_var("A", "");
        assert!(!env.contains("A"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let overrides = EnvironmentOverride::single("BAD=NAME", "x");
        let mut env = EnvVars::new();
        assert!(matches!(
            overrides.expand(&mut env),
            Err(ExpandError::InvalidName(_))
        ));
    }

    #[test]
    fn test_merge_applies_subsequent_last() {
        let ambient: Arc<dyn EnvironmentExpander> = Arc::new(Fixed("changePath", "ambient"));
        let merged = merge(
            Some(ambient),
            Arc::new(EnvironmentOverride::single("changePath", "override")),
        );
        let mut env = EnvVars::new();
        merged.expand(&mut env).expect("expand");
        assert_eq!(env.get("changePath"), Some("override"));
    }

    #[test]
    fn test_merge_without_ambient() {
        let merged = merge(None, Arc::new(Fixed("ONLY", "1")));
        let mut env = EnvVars::new();
        merged.expand(&mut env).expect("expand");
        assert_eq!(env.len(), 1);
    }
}
