use serde::{Deserialize, Serialize};

/// Include/exclude rules over leaf keys and their paths.
///
/// Used both as a configuration's custom collection filter and as the
/// selective filter of a restore. Paths look like
/// `userData/profiles/user_42`; a path rule matches whole segments, so
/// `userData/profiles` covers `userData/profiles/user_42` but not
/// `userData/profiles_archive/x`.
///
/// Exclusions always win. When either inclusion list is non-empty, only
/// items matching at least one inclusion pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFilter {
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default)]
    pub include_keys: Vec<String>,
    #[serde(default)]
    pub exclude_keys: Vec<String>,
}

impl KeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn exclude_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn include_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn exclude_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// True when the filter passes everything
    pub fn is_empty(&self) -> bool {
        self.include_paths.is_empty()
            && self.exclude_paths.is_empty()
            && self.include_keys.is_empty()
            && self.exclude_keys.is_empty()
    }

    /// Whether the leaf `key` living at `path` passes the filter
    pub fn allows(&self, path: &str, key: &str) -> bool {
        if self.exclude_keys.iter().any(|k| k == key) {
            return false;
        }
        if self.exclude_paths.iter().any(|p| path_covers(p, path)) {
            return false;
        }

        let has_inclusions = !self.include_keys.is_empty() || !self.include_paths.is_empty();
        if !has_inclusions {
            return true;
        }

        self.include_keys.iter().any(|k| k == key)
            || self.include_paths.iter().any(|p| path_covers(p, path))
    }
}

fn path_covers(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
