//! Ignored-path matching for per-request stage bypass.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Compile one pattern the way every ignore list compiles it.
///
/// `*` does not cross `/`; use `**` to match nested segments.
pub fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// A compiled list of path globs. Empty lists match nothing.
#[derive(Debug, Clone)]
pub struct IgnoredPaths {
    set: GlobSet,
}

impl IgnoredPaths {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile_glob(pattern.as_ref())?);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Returns true if `path` matches any configured pattern.
    pub fn matches(&self, path: &str) -> bool {
        !self.set.is_empty() && self.set.is_match(path)
    }
}
