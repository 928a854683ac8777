//! Rendered per-instance output.

use serde::Serialize;

/// One instance's series restricted to the requested window.
///
/// `time` is epoch millis, most recent first. Each field holds one value per
/// timestamp; missing samples are NaN (serialized as `null`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub time: Vec<i64>,
    pub fields: Vec<Field>,
}

/// One data point column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub values: Vec<f64>,
}

impl Frame {
    pub fn new(name: impl Into<String>, field_names: &[String]) -> Self {
        Self {
            name: name.into(),
            time: Vec::new(),
            fields: field_names
                .iter()
                .map(|n| Field {
                    name: n.clone(),
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}
