//! Data model for extensions, change descriptors and ledger rows

use chrono::{DateTime, Utc};
use plinth_core::utils::namespace_to_identifier;
use semver::VersionReq;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Ledger version of an extension that has never been installed
pub const UNINSTALLED_VERSION: &str = "0";

/// Descriptor file every extension directory carries
pub const DESCRIPTOR_FILE: &str = "extension.yaml";

/// Kind of installable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Plugin,
    Theme,
    Module,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 3] = [Self::Plugin, Self::Theme, Self::Module];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Theme => "theme",
            Self::Module => "module",
        }
    }

    /// Plural directory-style name (`plugins`, `themes`, `modules`)
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Theme => "themes",
            Self::Module => "modules",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtensionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plugin" | "plugins" => Ok(Self::Plugin),
            "theme" | "themes" => Ok(Self::Theme),
            "module" | "modules" => Ok(Self::Module),
            other => Err(format!("unknown extension kind '{}'", other)),
        }
    }
}

/// `replaces` may be written as a map of constraints or a bare list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReplacesDecl {
    Constrained(BTreeMap<String, String>),
    Any(Vec<String>),
}

impl Default for ReplacesDecl {
    fn default() -> Self {
        Self::Any(Vec::new())
    }
}

/// Raw contents of `extension.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionDescriptor {
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Remote package reference used for artifact updates
    #[serde(default)]
    pub package: Option<String>,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub replaces: ReplacesDecl,

    #[serde(default)]
    pub elevated: bool,
}

impl ExtensionDescriptor {
    /// Declared identifier, preferring an explicit `identifier` over `namespace`
    pub fn declared_identifier(&self) -> Option<String> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.namespace.as_deref().map(namespace_to_identifier))
            .filter(|id| !id.is_empty())
    }
}

/// An installable unit discovered on disk
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub identifier: String,
    pub kind: ExtensionKind,
    pub path: PathBuf,
    pub name: Option<String>,
    pub description: Option<String>,
    pub package: Option<String>,
    pub requires: Vec<String>,
    /// Superseded identifier to the version constraint it is replaced under
    pub replaces: BTreeMap<String, Option<VersionReq>>,
    pub is_elevated: bool,
}

impl Extension {
    /// Build an extension from its parsed descriptor
    pub fn from_descriptor(
        identifier: String,
        kind: ExtensionKind,
        path: PathBuf,
        descriptor: ExtensionDescriptor,
    ) -> Result<Self, String> {
        let replaces = match descriptor.replaces {
            ReplacesDecl::Any(ids) => ids.into_iter().map(|id| (id, None)).collect(),
            ReplacesDecl::Constrained(map) => map
                .into_iter()
                .map(|(id, constraint)| {
                    let req = match constraint.trim() {
                        "" | "*" => None,
                        raw => Some(VersionReq::parse(raw).map_err(|e| {
                            format!("invalid replaces constraint '{}' for {}: {}", raw, id, e)
                        })?),
                    };
                    Ok((id, req))
                })
                .collect::<Result<_, String>>()?,
        };

        Ok(Self {
            identifier,
            kind,
            path,
            name: descriptor.name,
            description: descriptor.description,
            package: descriptor.package,
            requires: descriptor.requires,
            replaces,
            is_elevated: descriptor.elevated,
        })
    }

    /// Minimal extension, used when scaffolding and in tests
    pub fn new(identifier: impl Into<String>, kind: ExtensionKind, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            path: path.into(),
            name: None,
            description: None,
            package: None,
            requires: Vec::new(),
            replaces: BTreeMap::new(),
            is_elevated: false,
        }
    }

    /// The single identifier this extension supersedes, if any
    pub fn replaced_identifier(&self) -> Option<&str> {
        self.replaces.keys().next().map(String::as_str)
    }

    /// Whether this extension may take over `target` installed at `installed_version`
    pub fn can_replace(&self, target: &str, installed_version: &str) -> bool {
        let Some((_, constraint)) = self
            .replaces
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(target))
        else {
            return false;
        };

        match constraint {
            None => true,
            Some(req) => crate::version_file::parse_lenient(installed_version)
                .map(|v| req.matches(&v))
                .unwrap_or(false),
        }
    }
}

/// One unit inside a manifest version entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDescriptor {
    Comment(String),
    Script(String),
}

impl ChangeDescriptor {
    pub fn detail(&self) -> &str {
        match self {
            Self::Comment(text) | Self::Script(text) => text,
        }
    }
}

/// History row type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Comment,
    Script,
}

/// Persisted per-extension state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub code: String,
    pub version: String,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub is_frozen: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted per applied unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub code: String,
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub version: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}
