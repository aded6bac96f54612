//! Curriculum Read Interface
//!
//! The curriculum itself (vocabulary lists, dialogues, grammar notes) is
//! external content. This module defines its shape and the narrow read
//! interface the rest of the pipeline consumes it through.

use crate::language::Language;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::debug;

/// One word taught by a unit. Identified by `(language, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    pub target: String,
    pub native: String,
    #[serde(default)]
    pub word_type: String,
    #[serde(default)]
    pub pronunciation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    pub speaker: String,
    pub target: String,
    #[serde(default)]
    pub native: String,
}

/// A set phrase taught alongside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub target: String,
    pub native: String,
}

/// The curriculum content of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub language: Language,
    pub level: u32,
    pub unit: u32,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
    #[serde(default)]
    pub phrases: Vec<Phrase>,
    #[serde(default)]
    pub grammar_notes: Vec<String>,
    /// Earlier units this unit explicitly revisits.
    #[serde(default)]
    pub review_units: Vec<u32>,
}

/// Read access to curriculum units.
///
/// `Ok(None)` means the curriculum has no data for that unit, which callers
/// treat as "not available" rather than as a failure.
#[async_trait]
pub trait CurriculumStore: Send + Sync {
    async fn unit(&self, language: Language, level: u32, unit: u32)
    -> Result<Option<UnitDefinition>>;
}

/// Reads units from `<root>/<language>/level<level>/unit<unit>.json`.
///
/// Parsed units are cached for the life of the process. Unit 1 of level 1
/// falls back to the language's seed content when no file exists.
pub struct FileCurriculumStore {
    root: PathBuf,
    cache: RwLock<HashMap<(Language, u32, u32), Option<UnitDefinition>>>,
}

impl FileCurriculumStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn unit_path(&self, language: Language, level: u32, unit: u32) -> PathBuf {
        self.root
            .join(language.to_string())
            .join(format!("level{}", level))
            .join(format!("unit{}.json", unit))
    }

    async fn load(path: &Path) -> Result<Option<UnitDefinition>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let unit = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid curriculum file {}", path.display()))?;
                Ok(Some(unit))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

#[async_trait]
impl CurriculumStore for FileCurriculumStore {
    async fn unit(
        &self,
        language: Language,
        level: u32,
        unit: u32,
    ) -> Result<Option<UnitDefinition>> {
        let key = (language, level, unit);
        let cached = {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow::anyhow!("curriculum cache poisoned"))?;
            cache.get(&key).cloned()
        };
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let path = self.unit_path(language, level, unit);
        let mut loaded = Self::load(&path).await?;
        if loaded.is_none() && level == 1 && unit == 1 {
            debug!(%language, "No curriculum file for unit 1, using seed content");
            loaded = Some(language.seed_unit());
        }

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| anyhow::anyhow!("curriculum cache poisoned"))?;
            cache.insert(key, loaded.clone());
        }
        Ok(loaded)
    }
}

/// An in-memory curriculum for development and tests.
#[derive(Default)]
pub struct MemoryCurriculumStore {
    units: HashMap<(Language, u32, u32), UnitDefinition>,
}

impl MemoryCurriculumStore {
    pub fn new(units: impl IntoIterator<Item = UnitDefinition>) -> Self {
        Self {
            units: units
                .into_iter()
                .map(|u| ((u.language, u.level, u.unit), u))
                .collect(),
        }
    }

    pub fn insert(&mut self, unit: UnitDefinition) {
        self.units.insert((unit.language, unit.level, unit.unit), unit);
    }
}

#[async_trait]
impl CurriculumStore for MemoryCurriculumStore {
    async fn unit(
        &self,
        language: Language,
        level: u32,
        unit: u32,
    ) -> Result<Option<UnitDefinition>> {
        Ok(self.units.get(&(language, level, unit)).cloned())
    }
}
