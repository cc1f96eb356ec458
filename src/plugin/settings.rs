use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::PluginError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Int,
    Float,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl SettingValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            SettingValue::Int(v) => Some(v as f64),
            SettingValue::Float(v) => Some(v),
            SettingValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One named, typed, range-bounded plugin setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: SettingKind,
    pub min: f64,
    pub max: f64,
    pub default: SettingValue,
}

impl SettingSpec {
    pub const fn float(name: &'static str, label: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name,
            label,
            kind: SettingKind::Float,
            min,
            max,
            default: SettingValue::Float(default),
        }
    }

    pub const fn int(name: &'static str, label: &'static str, min: i64, max: i64, default: i64) -> Self {
        Self {
            name,
            label,
            kind: SettingKind::Int,
            min: min as f64,
            max: max as f64,
            default: SettingValue::Int(default),
        }
    }

    pub const fn boolean(name: &'static str, label: &'static str, default: bool) -> Self {
        Self {
            name,
            label,
            kind: SettingKind::Bool,
            min: 0.0,
            max: 1.0,
            default: SettingValue::Bool(default),
        }
    }

    fn check(&self, value: SettingValue) -> Result<SettingValue, PluginError> {
        let coerced = match (self.kind, value) {
            (SettingKind::Bool, SettingValue::Bool(_)) => return Ok(value),
            (SettingKind::Int, SettingValue::Int(_)) => value,
            (SettingKind::Float, SettingValue::Float(_)) => value,
            // toml writes `1` for a float setting as an integer
            (SettingKind::Float, SettingValue::Int(v)) => SettingValue::Float(v as f64),
            _ => {
                return Err(PluginError::InvalidSetting {
                    name: self.name.to_string(),
                    reason: format!("expected {:?}, got {value}", self.kind),
                })
            }
        };

        let numeric = coerced.as_f64().unwrap_or_default();
        if !numeric.is_finite() || numeric < self.min || numeric > self.max {
            return Err(PluginError::InvalidSetting {
                name: self.name.to_string(),
                reason: format!("{numeric} outside [{}, {}]", self.min, self.max),
            });
        }
        Ok(coerced)
    }
}

/// Resolved `name -> value` mapping handed to `Plugin::init`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn defaults(schema: &[SettingSpec]) -> Self {
        let values = schema
            .iter()
            .map(|spec| (spec.name.to_string(), spec.default))
            .collect();
        Self { values }
    }

    /// Overlays `overrides` on the schema defaults, rejecting unknown names,
    /// mismatched kinds and out-of-range values.
    pub fn resolve(
        schema: &[SettingSpec],
        overrides: &BTreeMap<String, SettingValue>,
    ) -> Result<Self, PluginError> {
        let mut settings = Self::defaults(schema);
        for (name, value) in overrides {
            let spec = schema
                .iter()
                .find(|spec| spec.name == name)
                .ok_or_else(|| PluginError::InvalidSetting {
                    name: name.clone(),
                    reason: "unknown setting".to_string(),
                })?;
            settings.values.insert(name.clone(), spec.check(*value)?);
        }
        Ok(settings)
    }

    pub fn get(&self, name: &str) -> Option<SettingValue> {
        self.values.get(name).copied()
    }

    pub fn f32_or(&self, name: &str, fallback: f32) -> f32 {
        self.get(name)
            .and_then(SettingValue::as_f64)
            .map(|v| v as f32)
            .unwrap_or(fallback)
    }

    pub fn usize_or(&self, name: &str, fallback: usize) -> usize {
        match self.get(name) {
            Some(SettingValue::Int(v)) if v >= 0 => v as usize,
            _ => fallback,
        }
    }

    pub fn bool_or(&self, name: &str, fallback: bool) -> bool {
        match self.get(name) {
            Some(SettingValue::Bool(v)) => v,
            _ => fallback,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[SettingSpec] = &[
        SettingSpec::int("num_hands", "Max hands", 1, 4, 2),
        SettingSpec::float("min_tracking_confidence", "Min tracking confidence", 0.0, 1.0, 0.5),
        SettingSpec::boolean("mirror", "Mirror", false),
    ];

    fn overrides(pairs: &[(&str, SettingValue)]) -> BTreeMap<String, SettingValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_defaults_from_schema() {
        let settings = Settings::defaults(SCHEMA);
        assert_eq!(settings.usize_or("num_hands", 0), 2);
        assert_eq!(settings.f32_or("min_tracking_confidence", 0.0), 0.5);
        assert!(!settings.bool_or("mirror", true));
    }

    #[test]
    fn test_resolve_overlays_and_coerces() {
        let settings = Settings::resolve(
            SCHEMA,
            &overrides(&[
                ("num_hands", SettingValue::Int(3)),
                ("min_tracking_confidence", SettingValue::Int(1)),
            ]),
        )
        .unwrap();
        assert_eq!(settings.get("num_hands"), Some(SettingValue::Int(3)));
        assert_eq!(
            settings.get("min_tracking_confidence"),
            Some(SettingValue::Float(1.0))
        );
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let out_of_range = Settings::resolve(SCHEMA, &overrides(&[("num_hands", SettingValue::Int(9))]));
        assert!(matches!(out_of_range, Err(PluginError::InvalidSetting { .. })));

        let wrong_kind =
            Settings::resolve(SCHEMA, &overrides(&[("num_hands", SettingValue::Float(1.5))]));
        assert!(matches!(wrong_kind, Err(PluginError::InvalidSetting { .. })));

        let nan = Settings::resolve(
            SCHEMA,
            &overrides(&[("min_tracking_confidence", SettingValue::Float(f64::NAN))]),
        );
        assert!(matches!(nan, Err(PluginError::InvalidSetting { .. })));

        let unknown = Settings::resolve(SCHEMA, &overrides(&[("bogus", SettingValue::Bool(true))]));
        assert!(matches!(unknown, Err(PluginError::InvalidSetting { name, .. }) if name == "bogus"));
    }

    #[test]
    fn test_setting_value_from_toml() {
        let table: BTreeMap<String, SettingValue> =
            toml::from_str("a = 1\nb = 0.25\nc = true\n").unwrap();
        assert_eq!(table["a"], SettingValue::Int(1));
        assert_eq!(table["b"], SettingValue::Float(0.25));
        assert_eq!(table["c"], SettingValue::Bool(true));
    }

    #[test]
    fn test_nan_from_toml_is_rejected() {
        let table: BTreeMap<String, SettingValue> =
            toml::from_str("min_tracking_confidence = nan\n").unwrap();
        assert!(Settings::resolve(SCHEMA, &table).is_err());
    }
}
