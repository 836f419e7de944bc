// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::HashMap, fmt::Debug, fs, path::Path};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// One formal parameter of a syscall signature, eg. `const char *pathname` is `{ name: "pathname", type_tag:
/// Some("char"), is_pointer: true, is_struct: false }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    /// Base C type of the parameter with qualifiers removed; `None` when the signature couldn't be interpreted.
    #[serde(rename = "type", default)]
    pub type_tag: Option<String>,
    #[serde(rename = "pointer", default)]
    pub is_pointer: bool,
    #[serde(rename = "struct", default)]
    pub is_struct: bool,
}

impl ParameterDefinition {
    #[must_use]
    pub fn new(name: &str, type_tag: Option<&str>, is_pointer: bool, is_struct: bool) -> Self {
        Self {
            name: String::from(name),
            type_tag: type_tag.map(String::from),
            is_pointer,
            is_struct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallDefinition {
    pub name: String,
    /// Ordered formal parameters.  `None` marks a syscall that is known, but whose signature is not modeled; all of
    /// its arguments are kept unconverted.
    #[serde(default)]
    pub parameters: Option<Vec<ParameterDefinition>>,
}

impl SyscallDefinition {
    #[must_use]
    pub fn new(name: &str, parameters: Vec<ParameterDefinition>) -> Self {
        Self {
            name: String::from(name),
            parameters: Some(parameters),
        }
    }

    #[must_use]
    pub fn unmodeled(name: &str) -> Self {
        Self {
            name: String::from(name),
            parameters: None,
        }
    }
}

/// Read-only source of syscall signatures, consumed by argument casting.
pub trait DefinitionCatalog: Debug + Send + Sync {
    fn lookup(&self, name: &str) -> Option<&SyscallDefinition>;

    /// Lookup with fallback for underscore-decorated names, eg. `_llseek` and `_newselect`.
    fn resolve(&self, name: &str) -> Option<&SyscallDefinition> {
        self.lookup(name)
            .or_else(|| self.lookup(name.trim_matches('_')))
    }

    fn arity(&self, name: &str) -> Option<usize> {
        self.resolve(name)
            .and_then(|def| def.parameters.as_ref())
            .map(Vec::len)
    }
}

/// In-memory catalog, typically loaded from a TOML file made of `[[syscall]]` tables.
#[derive(Debug, Default, Clone)]
pub struct SyscallCatalog {
    definitions: HashMap<String, SyscallDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(rename = "syscall", default)]
    syscalls: Vec<SyscallDefinition>,
}

impl SyscallCatalog {
    #[must_use]
    pub fn new(definitions: Vec<SyscallDefinition>) -> Self {
        let mut catalog = Self::default();
        for definition in definitions {
            catalog.insert(definition);
        }
        catalog
    }

    /// Adds a definition, replacing any previous definition with the same name.
    pub fn insert(&mut self, definition: SyscallDefinition) -> Option<SyscallDefinition> {
        self.definitions.insert(definition.name.clone(), definition)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(contents)?;
        Ok(Self::new(file.syscalls))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context(format!("failed to read syscall catalog {path:?}"))?;
        Self::from_toml_str(&contents).context(format!("failed to parse syscall catalog {path:?}"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl DefinitionCatalog for SyscallCatalog {
    fn lookup(&self, name: &str) -> Option<&SyscallDefinition> {
        self.definitions.get(name)
    }
}
