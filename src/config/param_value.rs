// ABOUTME: Parameter value types with environment indirection.
// ABOUTME: Accepts YAML scalars and `{ env: NAME }` references, resolved to strings.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Flag(bool),
    Number(i64),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl ParamValue {
    pub fn resolve(&self, name: &str) -> Result<String> {
        match self {
            ParamValue::Text(s) => Ok(s.clone()),
            ParamValue::Flag(b) => Ok(b.to_string()),
            ParamValue::Number(n) => Ok(n.to_string()),
            ParamValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default.clone().ok_or_else(|| Error::MissingEnvVar {
                    param: name.to_string(),
                    var: var.clone(),
                }),
            },
        }
    }
}

pub fn resolve_param_map(map: &HashMap<String, ParamValue>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve(k).map(|resolved| (k.clone(), resolved)))
        .collect()
}
