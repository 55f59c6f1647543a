use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Result, SharkError};
use crate::model::{self, Epic, Feature, Task};

const DELIMITER: &str = "---";

/// Recognized frontmatter fields of an entity file. Unknown fields are
/// retained so foreign tooling's keys survive a rewrite.
///
/// `status` is parsed for validation but never serialized: the database owns
/// status, and no code path writes it back into a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing)]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Frontmatter {
    /// Priority as the bounded integer scale, accepting categorical names.
    pub fn priority_value(&self) -> Result<Option<i64>> {
        match &self.priority {
            None => Ok(None),
            Some(Value::Number(n)) => {
                let p = n
                    .as_i64()
                    .ok_or_else(|| SharkError::InvalidPriority(n.to_string()))?;
                model::validate_priority(p)?;
                Ok(Some(p))
            }
            Some(Value::String(s)) => Ok(Some(model::parse_priority(s)?)),
            Some(other) => Err(SharkError::InvalidPriority(format!("{other:?}"))),
        }
    }

    pub fn for_epic(epic: &Epic) -> Self {
        Self {
            key: Some(epic.key.clone()),
            title: Some(epic.title.clone()),
            priority: Some(Value::from(epic.priority)),
            custom_folder_path: epic.custom_folder_path.clone(),
            ..Default::default()
        }
    }

    pub fn for_feature(feature: &Feature) -> Self {
        Self {
            key: Some(feature.key.clone()),
            title: Some(feature.title.clone()),
            priority: Some(Value::from(feature.priority)),
            execution_order: feature.execution_order,
            custom_folder_path: feature.custom_folder_path.clone(),
            ..Default::default()
        }
    }

    pub fn for_task(task: &Task, dependencies: Vec<String>) -> Self {
        Self {
            key: Some(task.key.clone()),
            title: Some(task.title.clone()),
            priority: Some(Value::from(task.priority)),
            agent_type: task.agent_type.clone(),
            execution_order: task.execution_order,
            dependencies,
            ..Default::default()
        }
    }
}

/// One entity file: frontmatter block + Markdown body.
///
/// The original frontmatter text is kept so an unmodified file renders back
/// byte-identically; editing the fields switches to the deterministic
/// stable-key-order writer.
#[derive(Debug, Clone)]
pub struct EntityFile {
    pub front: Frontmatter,
    pub body: String,
    raw_front: Option<String>,
    modified: bool,
}

impl EntityFile {
    pub fn new(front: Frontmatter, body: String) -> Self {
        Self {
            front,
            body,
            raw_front: None,
            modified: true,
        }
    }

    /// Parse file text. A file without a leading frontmatter block is all
    /// body.
    pub fn parse(text: &str) -> Result<Self> {
        let Some(rest) = text.strip_prefix("---\n").or_else(|| text.strip_prefix("---\r\n"))
        else {
            return Ok(Self {
                front: Frontmatter::default(),
                body: text.to_string(),
                raw_front: None,
                modified: false,
            });
        };

        let mut offset = 0;
        for line in rest.split_inclusive('\n') {
            if line.trim_end_matches(['\r', '\n']) == DELIMITER {
                let raw_front = &rest[..offset];
                let body = &rest[offset + line.len()..];
                let front: Frontmatter = if raw_front.trim().is_empty() {
                    Frontmatter::default()
                } else {
                    serde_yaml::from_str(raw_front)?
                };
                return Ok(Self {
                    front,
                    body: body.to_string(),
                    raw_front: Some(raw_front.to_string()),
                    modified: false,
                });
            }
            offset += line.len();
        }

        // Unterminated frontmatter block: treat the whole file as body.
        Ok(Self {
            front: Frontmatter::default(),
            body: text.to_string(),
            raw_front: None,
            modified: false,
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Replace the frontmatter, marking the file for deterministic
    /// re-rendering.
    pub fn set_front(&mut self, front: Frontmatter) {
        self.front = front;
        self.modified = true;
    }

    pub fn render(&self) -> Result<String> {
        if !self.modified {
            return Ok(match &self.raw_front {
                Some(raw) => format!("{DELIMITER}\n{raw}{DELIMITER}\n{}", self.body),
                None => self.body.clone(),
            });
        }
        let mut mapping = serde_yaml::Mapping::new();
        let as_value = serde_yaml::to_value(&self.front)?;
        let Value::Mapping(fields) = as_value else {
            return Err(SharkError::Integrity(
                "frontmatter did not serialize to a mapping".into(),
            ));
        };
        // Stable key order: recognized fields first, extras alphabetically
        // (they already are: BTreeMap).
        for name in [
            "key",
            "title",
            "priority",
            "agent_type",
            "execution_order",
            "custom_folder_path",
            "dependencies",
        ] {
            if let Some(v) = fields.get(name) {
                mapping.insert(Value::from(name), v.clone());
            }
        }
        for (k, v) in &fields {
            if !mapping.contains_key(k) {
                mapping.insert(k.clone(), v.clone());
            }
        }
        let rendered = serde_yaml::to_string(&mapping)?;
        Ok(format!("{DELIMITER}\n{rendered}{DELIMITER}\n{}", self.body))
    }

    /// Write the file, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render()?)?;
        Ok(())
    }
}
