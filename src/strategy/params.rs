//! Typed access to a strategy's option map

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Reads typed values from a `params` map, reporting bad values as `ConfigInvalid`
pub struct ParamReader<'a> {
    strategy_id: &'a str,
    params: &'a HashMap<String, Value>,
}

impl<'a> ParamReader<'a> {
    pub fn new(strategy_id: &'a str, params: &'a HashMap<String, Value>) -> Self {
        Self {
            strategy_id,
            params,
        }
    }

    /// First present key among `keys`
    fn lookup<'k>(&self, keys: &[&'k str]) -> Option<(&'k str, &'a Value)> {
        keys.iter()
            .find_map(|k| self.params.get(*k).map(|v| (*k, v)))
            .filter(|(_, v)| !v.is_null())
    }

    pub fn f64_or(&self, keys: &[&str], default: f64) -> Result<f64> {
        Ok(self.opt_f64(keys)?.unwrap_or(default))
    }

    pub fn opt_f64(&self, keys: &[&str]) -> Result<Option<f64>> {
        match self.lookup(keys) {
            None => Ok(None),
            Some((key, value)) => {
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                match parsed {
                    Some(v) if v.is_finite() => Ok(Some(v)),
                    _ => Err(self.invalid(key, value)),
                }
            }
        }
    }

    pub fn u32_or(&self, keys: &[&str], default: u32) -> Result<u32> {
        Ok(self.opt_u32(keys)?.unwrap_or(default))
    }

    pub fn opt_u32(&self, keys: &[&str]) -> Result<Option<u32>> {
        match self.lookup(keys) {
            None => Ok(None),
            Some((key, value)) => {
                let parsed = match value {
                    Value::Number(n) => n
                        .as_u64()
                        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                };
                parsed
                    .and_then(|v| u32::try_from(v).ok())
                    .map(Some)
                    .ok_or_else(|| self.invalid(key, value))
            }
        }
    }

    pub fn str_or(&self, keys: &[&str], default: &str) -> Result<String> {
        match self.lookup(keys) {
            None => Ok(default.to_string()),
            Some((_, Value::String(s))) => Ok(s.trim().to_lowercase()),
            Some((key, value)) => Err(self.invalid(key, value)),
        }
    }

    fn invalid(&self, key: &str, value: &Value) -> Error {
        Error::ConfigInvalid(format!(
            "{}: invalid value for '{}': {}",
            self.strategy_id, key, value
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_numbers_and_strings() {
        let mut params = HashMap::new();
        params.insert("amount_per_buy".to_string(), json!(75));
        params.insert("interval_hours".to_string(), json!("12"));
        params.insert("level_spacing".to_string(), json!("Geometric"));
        let reader = ParamReader::new("s1", &params);

        assert_eq!(reader.f64_or(&["amount_per_buy"], 50.0).unwrap(), 75.0);
        assert_eq!(reader.f64_or(&["interval_hours"], 24.0).unwrap(), 12.0);
        assert_eq!(reader.f64_or(&["missing"], 5.0).unwrap(), 5.0);
        assert_eq!(reader.str_or(&["level_spacing"], "arithmetic").unwrap(), "geometric");
    }

    #[test]
    fn test_aliases_and_errors() {
        let mut params = HashMap::new();
        params.insert("num_grids".to_string(), json!(8));
        params.insert("max_buys".to_string(), json!(-3));
        params.insert("dip_threshold".to_string(), json!("abc"));
        let reader = ParamReader::new("s1", &params);

        assert_eq!(reader.u32_or(&["num_levels", "num_grids"], 10).unwrap(), 8);
        assert!(reader.opt_u32(&["max_buys"]).is_err());
        assert!(matches!(
            reader.opt_f64(&["dip_threshold"]),
            Err(Error::ConfigInvalid(_))
        ));
    }
}
