//! Module manifest models
//!
//! A module manifest declares the coordinates of a feature module and the
//! dependencies that must be resolved before the module may be activated.
//! Descriptors are immutable after discovery; validation happens before the
//! owning module enters the dependency graph.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Manifest validation failures, fatal for the declaring module
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Missing group of module dependency")]
    MissingDependencyGroup,

    #[error("Missing name of module dependency")]
    MissingDependencyName,

    #[error("Missing version of module dependency")]
    MissingDependencyVersion,

    #[error("Missing {0} of module descriptor")]
    MissingDescriptorField(&'static str),

    #[error("Invalid module name '{0}'")]
    InvalidModuleName(String),
}

/// Named repository a downloadable dependency can be fetched from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRepository {
    pub name: String,
    pub url: String,
}

/// One declared dependency of a module.
///
/// A dependency carrying neither a repository nor a direct URL must already
/// be satisfied by another loaded module with matching group and name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub group: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl ModuleDependency {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            repo: None,
            url: None,
            group: Some(group.into()),
            name: Some(name.into()),
            version: Some(version.into()),
        }
    }

    /// Verify that group, name and version are all present.
    ///
    /// Must pass before the owning module is resolved into the dependency
    /// graph; failure is a fatal load error for that module.
    pub fn assert_default_properties_set(&self) -> Result<(), ManifestError> {
        match (&self.group, &self.name, &self.version) {
            (None, _, _) => Err(ManifestError::MissingDependencyGroup),
            (_, None, _) => Err(ManifestError::MissingDependencyName),
            (_, _, None) => Err(ManifestError::MissingDependencyVersion),
            (Some(group), Some(name), Some(version)) => {
                if group.is_empty() {
                    Err(ManifestError::MissingDependencyGroup)
                } else if name.is_empty() {
                    Err(ManifestError::MissingDependencyName)
                } else if version.is_empty() {
                    Err(ManifestError::MissingDependencyVersion)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// A dependency with no repository and no URL is satisfied by another
    /// loaded module rather than downloaded.
    pub fn satisfied_locally(&self) -> bool {
        self.repo.is_none() && self.url.is_none()
    }
}

impl Display for ModuleDependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.group.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default(),
            self.version.as_deref().unwrap_or_default(),
        )
    }
}

/// Module manifest as read at discovery time
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub repos: Vec<ModuleRepository>,
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl ModuleDescriptor {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// Validate the descriptor and every declared dependency.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.group.is_empty() {
            return Err(ManifestError::MissingDescriptorField("group"));
        }
        if self.name.is_empty() {
            return Err(ManifestError::MissingDescriptorField("name"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingDescriptorField("version"));
        }
        if !armada_common::is_valid(&self.name) {
            return Err(ManifestError::InvalidModuleName(self.name.clone()));
        }
        for dependency in &self.dependencies {
            dependency.assert_default_properties_set()?;
        }
        Ok(())
    }

    pub fn coordinates(&self) -> String {
        format!("{}:{}:{}", self.group, self.name, self.version)
    }
}

/// Lifecycle states a loaded module moves through
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleState {
    #[default]
    Created,
    Loaded,
    Started,
    Stopped,
    Unloaded,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Created => "CREATED",
            ModuleState::Loaded => "LOADED",
            ModuleState::Started => "STARTED",
            ModuleState::Stopped => "STOPPED",
            ModuleState::Unloaded => "UNLOADED",
        }
    }

    /// Whether the lifecycle may move from `self` to `target`.
    pub fn can_change_to(&self, target: ModuleState) -> bool {
        matches!(
            (self, target),
            (ModuleState::Created, ModuleState::Loaded)
                | (ModuleState::Loaded, ModuleState::Started)
                | (ModuleState::Loaded, ModuleState::Unloaded)
                | (ModuleState::Started, ModuleState::Stopped)
                | (ModuleState::Stopped, ModuleState::Started)
                | (ModuleState::Stopped, ModuleState::Unloaded)
        )
    }
}

impl Display for ModuleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ModuleState::Created),
            "LOADED" => Ok(ModuleState::Loaded),
            "STARTED" => Ok(ModuleState::Started),
            "STOPPED" => Ok(ModuleState::Stopped),
            "UNLOADED" => Ok(ModuleState::Unloaded),
            _ => Err(format!("Invalid module state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_missing_version_fails() {
        let dependency = ModuleDependency {
            group: Some("eu.armada".to_string()),
            name: Some("proxy".to_string()),
            version: None,
            ..Default::default()
        };
        assert_eq!(
            dependency.assert_default_properties_set(),
            Err(ManifestError::MissingDependencyVersion)
        );
    }

    #[test]
    fn test_dependency_missing_group_and_name() {
        let dependency = ModuleDependency {
            version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        assert_eq!(
            dependency.assert_default_properties_set(),
            Err(ManifestError::MissingDependencyGroup)
        );

        let dependency = ModuleDependency {
            group: Some("eu.armada".to_string()),
            version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        assert_eq!(
            dependency.assert_default_properties_set(),
            Err(ManifestError::MissingDependencyName)
        );
    }

    #[test]
    fn test_dependency_without_source_is_local() {
        let dependency = ModuleDependency::new("eu.armada", "proxy", "1.0.0");
        assert!(dependency.assert_default_properties_set().is_ok());
        assert!(dependency.satisfied_locally());
        assert_eq!(dependency.to_string(), "eu.armada:proxy:1.0.0");

        let downloadable = ModuleDependency {
            url: Some("https://example.com/proxy.jar".to_string()),
            ..ModuleDependency::new("eu.armada", "proxy", "1.0.0")
        };
        assert!(!downloadable.satisfied_locally());
    }

    #[test]
    fn test_descriptor_validation() {
        let descriptor = ModuleDescriptor::new("eu.armada", "sync-proxy", "1.2.0");
        assert!(descriptor.validate().is_ok());
        assert_eq!(descriptor.coordinates(), "eu.armada:sync-proxy:1.2.0");

        let missing = ModuleDescriptor::new("eu.armada", "", "1.2.0");
        assert_eq!(
            missing.validate(),
            Err(ManifestError::MissingDescriptorField("name"))
        );

        let bad_name = ModuleDescriptor::new("eu.armada", "bad name", "1.2.0");
        assert_eq!(
            bad_name.validate(),
            Err(ManifestError::InvalidModuleName("bad name".to_string()))
        );

        let mut with_dependency = ModuleDescriptor::new("eu.armada", "sync-proxy", "1.2.0");
        with_dependency.dependencies.push(ModuleDependency {
            group: Some("eu.armada".to_string()),
            name: Some("bridge".to_string()),
            version: None,
            ..Default::default()
        });
        assert_eq!(
            with_dependency.validate(),
            Err(ManifestError::MissingDependencyVersion)
        );
    }

    #[test]
    fn test_module_state_transitions() {
        assert!(ModuleState::Created.can_change_to(ModuleState::Loaded));
        assert!(ModuleState::Loaded.can_change_to(ModuleState::Started));
        assert!(ModuleState::Started.can_change_to(ModuleState::Stopped));
        assert!(ModuleState::Stopped.can_change_to(ModuleState::Started));
        assert!(ModuleState::Stopped.can_change_to(ModuleState::Unloaded));
        assert!(ModuleState::Loaded.can_change_to(ModuleState::Unloaded));

        assert!(!ModuleState::Created.can_change_to(ModuleState::Started));
        assert!(!ModuleState::Started.can_change_to(ModuleState::Unloaded));
        assert!(!ModuleState::Unloaded.can_change_to(ModuleState::Started));
    }

    #[test]
    fn test_module_state_parse() {
        assert_eq!("STARTED".parse::<ModuleState>().unwrap(), ModuleState::Started);
        assert!("RUNNING".parse::<ModuleState>().is_err());
    }
}
