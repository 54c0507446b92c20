//! Bridge configuration.
//!
//! A [`BridgeConfig`] is built programmatically, parsed from TOML, or
//! adjusted from environment variables:
//!
//! ```toml
//! signature_policy = "heuristic"
//! verbose = true
//! track_calls = true
//! alias_prefix = "oc_"
//! reserved_names = ["class", "hash", "new"]
//! ```
//!
//! | Variable                    | Field              |
//! |-----------------------------|--------------------|
//! | `OXIDEX_BRIDGE_SIGNATURES`  | `signature_policy` |
//! | `OXIDEX_BRIDGE_VERBOSE`     | `verbose`          |
//! | `OXIDEX_BRIDGE_TRACK_CALLS` | `track_calls`      |

use crate::error::{Error, Result};
use serde::Deserialize;

/// Names the script object model cannot safely override with a bridged
/// method. Bridged methods with these script names are installed under
/// `alias_prefix + name`.
pub const DEFAULT_RESERVED_NAMES: &[&str] = &[
    "class",
    "hash",
    "new",
    "self",
    "superclass",
    "type",
    "alloc",
    "dealloc",
    "isEqual_",
];

/// How the bridge obtains a signature that was not given explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    /// Only explicit signatures and signatures the native runtime exposes.
    #[default]
    Explicit,
    /// Additionally derive `v@:@` for single-colon selectors and `@@:` for
    /// colon-free selectors.
    Heuristic,
}

impl SignaturePolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "explicit" | "strict" => Ok(SignaturePolicy::Explicit),
            "heuristic" | "guess" => Ok(SignaturePolicy::Heuristic),
            other => Err(Error::Config(format!(
                "unknown signature policy '{other}'"
            ))),
        }
    }
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Signature resolution policy.
    pub signature_policy: SignaturePolicy,
    /// Log every method binding at `info` instead of `debug`.
    pub verbose: bool,
    /// Count calls per selector and per signature.
    pub track_calls: bool,
    /// Script names that are bound under an alias.
    pub reserved_names: Vec<String>,
    /// Prefix used to alias reserved names.
    pub alias_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            signature_policy: SignaturePolicy::Explicit,
            verbose: false,
            track_calls: false,
            reserved_names: DEFAULT_RESERVED_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            alias_prefix: "oc_".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parses a configuration from TOML. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed TOML or unknown values.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `OXIDEX_BRIDGE_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable holds an invalid value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::vars())
    }

    /// Applies `OXIDEX_BRIDGE_*` overrides from an iterator of pairs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable holds an invalid value.
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "OXIDEX_BRIDGE_SIGNATURES" => {
                    self.signature_policy = SignaturePolicy::parse(value)?;
                }
                "OXIDEX_BRIDGE_VERBOSE" => self.verbose = parse_flag(value)?,
                "OXIDEX_BRIDGE_TRACK_CALLS" => {
                    self.track_calls = parse_flag(value)?;
                }
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Builder-style setter for the signature policy.
    #[must_use]
    pub fn signature_policy(mut self, policy: SignaturePolicy) -> Self {
        self.signature_policy = policy;
        self
    }

    /// Builder-style setter for call tracking.
    #[must_use]
    pub fn track_calls(mut self, enabled: bool) -> Self {
        self.track_calls = enabled;
        self
    }

    /// Builder-style setter for verbose binding logs.
    #[must_use]
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Returns true if `name` must be aliased.
    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names.iter().any(|reserved| reserved == name)
    }

    /// Returns the alias used for a reserved script name.
    #[must_use]
    pub fn alias_for(&self, name: &str) -> String {
        format!("{}{name}", self.alias_prefix)
    }

    fn validate(&self) -> Result<()> {
        if self.alias_prefix.is_empty() {
            return Err(Error::Config("alias_prefix must not be empty".into()));
        }
        if self.is_reserved(&self.alias_prefix) {
            return Err(Error::Config(
                "alias_prefix must not itself be reserved".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("invalid flag value '{other}'"))),
    }
}
