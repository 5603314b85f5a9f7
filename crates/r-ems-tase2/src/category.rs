//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Host pipeline configuration category with per-item value and default."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub default: String,
}

/// Named configuration items as delivered by the host pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigCategory {
    items: IndexMap<String, ConfigItem>,
}

impl ConfigCategory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(document: &str) -> serde_json::Result<Self> {
        serde_json::from_str(document)
    }

    /// Builder form of [`ConfigCategory::set`].
    pub fn with_item(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        self.set(name, value, default);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, default: impl Into<String>) {
        self.items.insert(
            name.into(),
            ConfigItem {
                description: None,
                value: value.into(),
                default: default.into(),
            },
        );
    }

    pub fn item_exists(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|item| item.value.as_str())
    }

    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|item| item.default.as_str())
    }

    /// The item's value, or its default when the value is empty.
    pub fn effective(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|item| {
            if item.value.is_empty() {
                item.default.as_str()
            } else {
                item.value.as_str()
            }
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
