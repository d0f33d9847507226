//! Worker specifiers and call routing.

use std::fmt;

use url::Url;

use isowire::Route;

use crate::call::CallError;

/// A module reference, absolute or relative to the calling module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleRef {
    Url(Url),
    Relative(String),
}

impl From<Url> for ModuleRef {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

impl From<&Url> for ModuleRef {
    fn from(url: &Url) -> Self {
        Self::Url(url.clone())
    }
}

/// Absolute URLs parse as such, anything else is kept as a relative reference.
impl From<&str> for ModuleRef {
    fn from(s: &str) -> Self {
        match Url::parse(s) {
            Ok(url) => Self::Url(url),
            Err(_) => Self::Relative(s.to_string()),
        }
    }
}

impl From<String> for ModuleRef {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Relative(s) => write!(f, "{}", s),
        }
    }
}

/// Designates a call target: a module, optionally pinned to a segregated worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSpecifier {
    pub module: ModuleRef,
    pub segregation_id: Option<String>,
}

impl WorkerSpecifier {
    pub fn new(module: impl Into<ModuleRef>) -> Self {
        Self {
            module: module.into(),
            segregation_id: None,
        }
    }

    pub fn segregated(mut self, segregation_id: impl Into<String>) -> Self {
        self.segregation_id = Some(segregation_id.into());
        self
    }

    pub fn url(&self) -> Option<&Url> {
        match &self.module {
            ModuleRef::Url(url) => Some(url),
            ModuleRef::Relative(_) => None,
        }
    }

    pub fn segregation_id(&self) -> Option<&str> {
        self.segregation_id.as_deref()
    }

    /// The absolute module URL, resolving a relative reference against `base`.
    pub fn resolve(&self, base: Option<&Url>) -> Result<Url, CallError> {
        match (&self.module, base) {
            (ModuleRef::Url(url), _) => Ok(url.clone()),
            (ModuleRef::Relative(path), Some(base)) => base
                .join(path)
                .map_err(|e| CallError::Specifier(format!("cannot resolve '{}' against {}: {}", path, base, e))),
            (ModuleRef::Relative(path), None) => {
                Err(CallError::Specifier(format!("relative module '{}' without a source module", path)))
            }
        }
    }
}

impl From<ModuleRef> for WorkerSpecifier {
    fn from(module: ModuleRef) -> Self {
        Self::new(module)
    }
}

impl From<Url> for WorkerSpecifier {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}

impl From<&Url> for WorkerSpecifier {
    fn from(url: &Url) -> Self {
        Self::new(url)
    }
}

impl From<&str> for WorkerSpecifier {
    fn from(module: &str) -> Self {
        Self::new(module)
    }
}

impl From<String> for WorkerSpecifier {
    fn from(module: String) -> Self {
        Self::new(module)
    }
}

impl<M: Into<ModuleRef>> From<(M, &str)> for WorkerSpecifier {
    fn from((module, segregation_id): (M, &str)) -> Self {
        Self::new(module).segregated(segregation_id)
    }
}

impl<M: Into<ModuleRef>> From<(M, Option<&str>)> for WorkerSpecifier {
    fn from((module, segregation_id): (M, Option<&str>)) -> Self {
        Self {
            module: module.into(),
            segregation_id: segregation_id.map(str::to_string),
        }
    }
}

impl fmt::Display for WorkerSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.segregation_id {
            Some(id) => write!(f, "{} @{}", self.module, id),
            None => write!(f, "{}", self.module),
        }
    }
}

/// The module URL without its fragment.
pub fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// The key a worker is registered under when no key supplier is configured.
pub fn default_worker_key(module: &Url, segregation_id: Option<&str>) -> String {
    let module = strip_fragment(module);
    match segregation_id {
        Some(id) => format!("{} @{}", module, id),
        None => module.to_string(),
    }
}

/// Builds the route of a call from `source` to `target`.
///
/// A relative target resolves against the source module. The cache buster is
/// left unset; it is looked up when the call is made.
pub(crate) fn routing(source: Option<&WorkerSpecifier>, target: &WorkerSpecifier) -> Result<Route, CallError> {
    let source_module = match source {
        Some(source) => Some(source.resolve(None)?),
        None => None,
    };
    let target_module = target.resolve(source_module.as_ref())?;

    let mut route = Route::new(target_module);
    route.target_segregation_id = target.segregation_id.clone();
    route.source_segregation_id = source.and_then(|s| s.segregation_id.clone());
    route.source_module = source_module;
    Ok(route)
}
