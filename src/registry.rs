//! Role-to-implementation table.
//!
//! A [`Registry`] is an explicit, owned object: the top-level feed load holds
//! one (usually behind an `Arc`) and asks it for its collaborators. The core
//! roles always have a built-in default, so resolving them only fails when a
//! caller registered something unsuitable.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use feedscout::cache::MemoryCache;
//! use feedscout::registry::{Implementation, Registry, Role};
//!
//! let registry = Registry::new();
//! registry.register(Role::Cache, Implementation::Cache(Arc::new(MemoryCache::new(16))));
//! assert_eq!(registry.cache().unwrap().name(), "memory");
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::cache::{CacheImplementation, Convention, MemoryCache};
use crate::feed::{Classifier, Fetch, HttpFile, LocatorBuilder, LocatorFactory, SniffingClassifier};

/// An abstract collaborator slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    File,
    Cache,
    Locator,
    Classifier,
    /// Caller-defined roles. These have no default.
    Custom(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::File => f.write_str("file"),
            Role::Cache => f.write_str("cache"),
            Role::Locator => f.write_str("locator"),
            Role::Classifier => f.write_str("classifier"),
            Role::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "file" => Role::File,
            "cache" => Role::Cache,
            "locator" => Role::Locator,
            "classifier" => Role::Classifier,
            _ => Role::Custom(s.trim().to_owned()),
        })
    }
}

/// A registered implementation. Cloning shares the underlying object.
#[derive(Clone)]
pub enum Implementation {
    File(Arc<dyn Fetch>),
    Cache(Arc<dyn CacheImplementation>),
    Locator(Arc<dyn LocatorFactory>),
    Classifier(Arc<dyn Classifier>),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Implementation {
    /// Name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Implementation::File(_) => "file",
            Implementation::Cache(_) => "cache",
            Implementation::Locator(_) => "locator",
            Implementation::Classifier(_) => "classifier",
            Implementation::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Implementation::Cache(cache) => write!(f, "Implementation::Cache({})", cache.name()),
            other => write!(f, "Implementation::{}", other.kind()),
        }
    }
}

/// Misuse of a registered implementation. Always a hard failure, never
/// reported as "no feed found".
#[derive(Debug, Error)]
pub enum UsageError {
    /// A role holds an implementation of the wrong kind
    #[error("role `{role}` holds a {found} implementation")]
    RoleMismatch { role: Role, found: &'static str },
    /// A cache implementation supports neither construction convention
    #[error("cache implementation `{0}` supports neither the factory nor the constructor convention")]
    UnsupportedConvention(String),
    /// A convention was forced on an implementation that does not support it
    #[error("cache implementation `{implementation}` does not support the {convention} convention")]
    IncompatibleConvention {
        implementation: String,
        convention: Convention,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("role `{0}` is not configured")]
    RoleNotConfigured(Role),
    #[error(transparent)]
    Usage(#[from] UsageError),
}

/// Maps roles to implementations. Last registration wins.
///
/// Entries are replaced whole under a write lock, so a concurrent
/// [`Registry::resolve`] sees either the old or the new implementation.
pub struct Registry {
    entries: RwLock<HashMap<Role, Implementation>>,
}

impl Registry {
    /// A registry holding the built-in defaults for every core role.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(Role::File, Implementation::File(Arc::new(HttpFile::default())));
        entries.insert(
            Role::Cache,
            Implementation::Cache(Arc::new(MemoryCache::default())),
        );
        entries.insert(
            Role::Locator,
            Implementation::Locator(Arc::new(LocatorBuilder::default())),
        );
        entries.insert(
            Role::Classifier,
            Implementation::Classifier(Arc::new(SniffingClassifier)),
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Registers `implementation` for `role`, replacing any previous entry.
    ///
    /// Registration never validates; an unsuitable implementation is reported
    /// when the role is first used.
    pub fn register(&self, role: Role, implementation: Implementation) {
        tracing::debug!(role = %role, kind = implementation.kind(), "Registering implementation");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(role, implementation);
    }

    /// # Errors
    ///
    /// [`RegistryError::RoleNotConfigured`] for a custom role nobody registered.
    pub fn resolve(&self, role: &Role) -> Result<Implementation, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(role)
            .cloned()
            .ok_or_else(|| RegistryError::RoleNotConfigured(role.clone()))
    }

    pub fn file(&self) -> Result<Arc<dyn Fetch>, RegistryError> {
        match self.resolve(&Role::File)? {
            Implementation::File(file) => Ok(file),
            other => Err(mismatch(Role::File, &other)),
        }
    }

    pub fn cache(&self) -> Result<Arc<dyn CacheImplementation>, RegistryError> {
        match self.resolve(&Role::Cache)? {
            Implementation::Cache(cache) => Ok(cache),
            other => Err(mismatch(Role::Cache, &other)),
        }
    }

    pub fn locator(&self) -> Result<Arc<dyn LocatorFactory>, RegistryError> {
        match self.resolve(&Role::Locator)? {
            Implementation::Locator(locator) => Ok(locator),
            other => Err(mismatch(Role::Locator, &other)),
        }
    }

    pub fn classifier(&self) -> Result<Arc<dyn Classifier>, RegistryError> {
        match self.resolve(&Role::Classifier)? {
            Implementation::Classifier(classifier) => Ok(classifier),
            other => Err(mismatch(Role::Classifier, &other)),
        }
    }
}

fn mismatch(role: Role, found: &Implementation) -> RegistryError {
    UsageError::RoleMismatch {
        role,
        found: found.kind(),
    }
    .into()
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_map().entries(entries.iter()).finish()
    }
}
