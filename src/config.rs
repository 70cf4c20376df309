//! Dispatch configuration: forced and disabled algorithms per operator.
//!
//! Sources, later ones winning:
//! 1. `QCONV_CONFIG` pointing at a JSON file shaped like [`DispatchConfig`]
//! 2. `QCONV_CONV_BIAS_ALGO` / `QCONV_BACKWARD_DATA_ALGO` forcing one variant
//! 3. `QCONV_DISABLE_ALGOS`, a comma separated list appended to both operators
//!
//! ```json
//! { "conv_bias": { "force": "INT8_NCHW32_IMMA_IMPLICIT_GEMM_128X128X64_64X64X64" },
//!   "conv_backward_data": { "disabled": ["ARM_COMMON_QUINT8_DIRECT_DOT_STRD2"] } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConvError, ConvResult};

pub const ENV_CONFIG: &str = "QCONV_CONFIG";
pub const ENV_CONV_BIAS_ALGO: &str = "QCONV_CONV_BIAS_ALGO";
pub const ENV_BACKWARD_DATA_ALGO: &str = "QCONV_BACKWARD_DATA_ALGO";
pub const ENV_DISABLE_ALGOS: &str = "QCONV_DISABLE_ALGOS";

/// Selection policy of one operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorPolicy {
    /// Use exactly this variant; selection fails if it is not usable.
    pub force: Option<String>,
    /// Variants skipped during priority-order selection.
    pub disabled: Vec<String>,
}

impl OperatorPolicy {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name)
    }

    /// Key fragment for selection caches.
    pub fn fingerprint(&self) -> String {
        format!(
            "force={}|off={}",
            self.force.as_deref().unwrap_or("-"),
            self.disabled.join(",")
        )
    }

    fn validate(&self, operator: &str) -> ConvResult<()> {
        if let Some(name) = &self.force {
            if name.trim().is_empty() {
                return Err(ConvError::InvalidOverride(format!(
                    "empty forced algorithm for {operator}"
                )));
            }
            if self.is_disabled(name) {
                return Err(ConvError::InvalidOverride(format!(
                    "{name} is both forced and disabled for {operator}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub conv_bias: OperatorPolicy,
    pub conv_backward_data: OperatorPolicy,
}

impl DispatchConfig {
    pub fn from_json_str(json: &str) -> ConvResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConvResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loading dispatch config from {:?}", path);
        Self::from_json_str(&text)
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> ConvResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConvResult<Self> {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        if let Some(name) = lookup(ENV_CONV_BIAS_ALGO) {
            config.conv_bias.force = Some(parse_forced(ENV_CONV_BIAS_ALGO, &name)?);
        }
        if let Some(name) = lookup(ENV_BACKWARD_DATA_ALGO) {
            config.conv_backward_data.force = Some(parse_forced(ENV_BACKWARD_DATA_ALGO, &name)?);
        }
        if let Some(list) = lookup(ENV_DISABLE_ALGOS) {
            for entry in list.split(',') {
                let name = entry.trim();
                if name.is_empty() {
                    log::warn!("Ignoring empty entry in {}={:?}", ENV_DISABLE_ALGOS, list);
                    continue;
                }
                config.conv_bias.disabled.push(name.to_string());
                config.conv_backward_data.disabled.push(name.to_string());
            }
        }

        config.validate()?;
        if config != Self::default() {
            log::info!("Dispatch overrides: {:?}", config);
        }
        Ok(config)
    }

    pub fn validate(&self) -> ConvResult<()> {
        self.conv_bias.validate("ConvBiasForward")?;
        self.conv_backward_data.validate("ConvolutionBackwardData")
    }
}

fn parse_forced(var: &str, value: &str) -> ConvResult<String> {
    let name = value.trim();
    if name.is_empty() {
        return Err(ConvError::InvalidOverride(format!("{var} is set but empty")));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_environment_is_default() {
        let config = DispatchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DispatchConfig::default());
        assert_eq!(config.conv_bias.fingerprint(), "force=-|off=");
    }

    #[test]
    fn test_env_force_and_disable() {
        let config = DispatchConfig::from_lookup(lookup(&[
            (ENV_CONV_BIAS_ALGO, " INT8_NCHW32_IMMA_IMPLICIT_GEMM_64X64X64_32X32X64 "),
            (ENV_DISABLE_ALGOS, "A, ,B"),
        ]))
        .unwrap();
        assert_eq!(
            config.conv_bias.force.as_deref(),
            Some("INT8_NCHW32_IMMA_IMPLICIT_GEMM_64X64X64_32X32X64")
        );
        assert_eq!(config.conv_backward_data.force, None);
        assert_eq!(config.conv_bias.disabled, vec!["A", "B"]);
        assert!(config.conv_backward_data.is_disabled("B"));
    }

    #[test]
    fn test_empty_force_is_rejected() {
        let err = DispatchConfig::from_lookup(lookup(&[(ENV_BACKWARD_DATA_ALGO, "  ")])).unwrap_err();
        assert!(matches!(err, ConvError::InvalidOverride(_)));
    }

    #[test]
    fn test_forced_and_disabled_conflict() {
        let err = DispatchConfig::from_json_str(
            r#"{"conv_bias": {"force": "X", "disabled": ["X"]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConvError::InvalidOverride(_)));
    }

    #[test]
    fn test_json_partial_sections() {
        let config = DispatchConfig::from_json_str(
            r#"{"conv_backward_data": {"disabled": ["ARM_COMMON_QUINT8_DIRECT_DOT_STRD2"]}}"#,
        )
        .unwrap();
        assert_eq!(config.conv_bias, OperatorPolicy::default());
        assert!(config
            .conv_backward_data
            .is_disabled("ARM_COMMON_QUINT8_DIRECT_DOT_STRD2"));
    }

    #[test]
    fn test_bad_json_and_missing_file() {
        assert!(matches!(
            DispatchConfig::from_json_str("{not json").unwrap_err(),
            ConvError::Config(_)
        ));
        let err = DispatchConfig::from_lookup(lookup(&[(ENV_CONFIG, "/nonexistent/qconv.json")]))
            .unwrap_err();
        assert!(matches!(err, ConvError::Io(_)));
    }

    #[test]
    fn test_config_file_then_env_override() {
        let path = std::env::temp_dir().join(format!("qconv-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"conv_bias": {"force": "FROM_FILE"}}"#).unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let from_file = DispatchConfig::from_lookup(lookup(&[(ENV_CONFIG, path_str.as_str())])).unwrap();
        assert_eq!(from_file.conv_bias.force.as_deref(), Some("FROM_FILE"));

        let overridden = DispatchConfig::from_lookup(lookup(&[
            (ENV_CONFIG, path_str.as_str()),
            (ENV_CONV_BIAS_ALGO, "FROM_ENV"),
        ]))
        .unwrap();
        assert_eq!(overridden.conv_bias.force.as_deref(), Some("FROM_ENV"));
        let _ = std::fs::remove_file(&path);
    }
}
