use std::fmt;
use std::sync::Arc;

use super::{CacheBackend, CacheError, CacheImplementation, CacheKey};
use crate::registry::UsageError;

/// The two ways a cache implementation can produce a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    Factory,
    Constructor,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Factory => f.write_str("factory"),
            Convention::Constructor => f.write_str("constructor"),
        }
    }
}

/// A backend together with the convention that produced it.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub backend: Arc<dyn CacheBackend>,
    pub convention: Convention,
}

impl fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("key", self.backend.key())
            .field("convention", &self.convention)
            .finish()
    }
}

/// Which convention resolution would use. The factory convention wins when
/// both are supported.
pub fn probe(implementation: &dyn CacheImplementation) -> Option<Convention> {
    if implementation.as_factory().is_some() {
        Some(Convention::Factory)
    } else if implementation.as_constructor().is_some() {
        Some(Convention::Constructor)
    } else {
        None
    }
}

/// Turns the registered cache implementation into per-key backends.
#[derive(Clone)]
pub struct CacheResolver {
    implementation: Arc<dyn CacheImplementation>,
}

impl CacheResolver {
    pub fn new(implementation: Arc<dyn CacheImplementation>) -> Self {
        Self { implementation }
    }

    pub fn implementation(&self) -> &Arc<dyn CacheImplementation> {
        &self.implementation
    }

    /// Resolves a backend for `key`.
    ///
    /// Exactly one convention runs: the factory when the implementation
    /// offers one, the constructor otherwise.
    ///
    /// # Errors
    ///
    /// [`UsageError::UnsupportedConvention`] when the implementation offers
    /// neither convention. Errors from the chosen convention are passed through.
    pub fn resolve_backend(&self, key: &CacheKey) -> Result<ResolvedBackend, CacheError> {
        let convention = probe(self.implementation.as_ref()).ok_or_else(|| {
            UsageError::UnsupportedConvention(self.implementation.name().to_owned())
        })?;
        self.resolve_with(key, convention)
    }

    /// Resolves a backend for `key` through a specific convention.
    ///
    /// # Errors
    ///
    /// [`UsageError::IncompatibleConvention`] when the implementation does not
    /// support `convention`. Its other convention is never tried.
    pub fn resolve_with(
        &self,
        key: &CacheKey,
        convention: Convention,
    ) -> Result<ResolvedBackend, CacheError> {
        let incompatible = || UsageError::IncompatibleConvention {
            implementation: self.implementation.name().to_owned(),
            convention,
        };

        let backend = match convention {
            Convention::Factory => self
                .implementation
                .as_factory()
                .ok_or_else(incompatible)?
                .handler(key)?,
            Convention::Constructor => self
                .implementation
                .as_constructor()
                .ok_or_else(incompatible)?
                .construct(key)?,
        };

        tracing::debug!(
            implementation = self.implementation.name(),
            key = %key,
            convention = %convention,
            "Resolved cache backend"
        );
        Ok(ResolvedBackend {
            backend,
            convention,
        })
    }
}

impl fmt::Debug for CacheResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheResolver")
            .field("implementation", &self.implementation.name())
            .finish()
    }
}
