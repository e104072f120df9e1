//! Tunable shader parameters.
//!
//! Parameters are declared by `#pragma parameter` lines in pass sources, may
//! be overridden by the preset's `parameters = "…"` section, and are mutated
//! at runtime through the host API. The table keeps declaration order so
//! listings stay stable.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    #[error("unknown parameter `{0}`")]
    Unknown(String),
    #[error("parameter `{name}` received a non-finite value")]
    NotFinite { name: String },
}

/// One named float parameter with its bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub label: String,
    pub current: f32,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ParameterValue {
    pub fn new(name: impl Into<String>, default: f32, min: f32, max: f32) -> Self {
        let name = name.into();
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            label: name.clone(),
            name,
            current: default,
            default,
            min,
            max,
            step: 0.0,
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Ordered parameter set shared by every pass of a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterTable {
    values: Vec<ParameterValue>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter; the first declaration of a name wins.
    ///
    /// Returns false when the name was already present.
    pub fn declare(&mut self, value: ParameterValue) -> bool {
        if let Some(existing) = self.get(&value.name) {
            if existing.default != value.default
                || existing.min != value.min
                || existing.max != value.max
            {
                debug!(
                    parameter = %value.name,
                    "conflicting parameter declaration ignored; first declaration wins"
                );
            }
            return false;
        }
        self.index.insert(value.name.clone(), self.values.len());
        self.values.push(value);
        true
    }

    /// Applies a preset override. Unknown names are ignored (the preset may
    /// carry values for shaders it no longer references).
    pub fn apply_override(&mut self, name: &str, value: f32) -> bool {
        match self.lookup(name) {
            Some(slot) => {
                let param = &mut self.values[slot];
                param.current = param.clamp(value);
                true
            }
            None => false,
        }
    }

    /// Sets the current value, clamped to the declared bounds, and returns
    /// the value actually stored.
    pub fn set(&mut self, name: &str, value: f32) -> Result<f32, ParameterError> {
        if !value.is_finite() {
            return Err(ParameterError::NotFinite {
                name: name.to_string(),
            });
        }
        let slot = self
            .lookup(name)
            .ok_or_else(|| ParameterError::Unknown(name.to_string()))?;
        let param = &mut self.values[slot];
        param.current = param.clamp(value);
        Ok(param.current)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.lookup(name).map(|slot| &self.values[slot])
    }

    pub fn value(&self, name: &str) -> Option<f32> {
        self.get(name).map(|param| param.current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        if self.index.len() == self.values.len() {
            return self.index.get(name).copied();
        }
        // Deserialized tables arrive without the index.
        self.values.iter().position(|param| param.name == name)
    }
}
