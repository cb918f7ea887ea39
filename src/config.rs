//! Process-wide configuration resolved once at façade construction:
//! database path and the force-tags/filter-tags Access Scope (§4.6).
//!
//! Parsing matches the original exactly (`manager_base.py::_get_force_tags`
//! / `cli_modules/tag_commands.py::_get_filter_tags`): split on `,`, trim,
//! lower-case, drop empty entries, de-duplicate.

use std::collections::BTreeSet;

/// The three states a caller's tag scope can be in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    /// No FORCE_TAGS configured: every list is visible and writable.
    Unrestricted,
    /// FORCE_TAGS is non-empty: reads and writes are confined to lists
    /// carrying ALL of these tags; new lists are auto-tagged with them.
    Forced(BTreeSet<String>),
    /// FORCE_TAGS is empty but FILTER_TAGS is set: read-listing operations
    /// use OR semantics over these tags; writes are unrestricted.
    Filtered(BTreeSet<String>),
}

impl AccessScope {
    /// Resolve from the recognized environment variables, matching the
    /// original's precedence: FORCE_TAGS, if set, overrides FILTER_TAGS
    /// entirely.
    pub fn from_env() -> Self {
        Self::resolve(
            std::env::var("TODOIT_FORCE_TAGS").unwrap_or_default(),
            std::env::var("TODOIT_FILTER_TAGS").unwrap_or_default(),
        )
    }

    /// Pure constructor over the raw env-var strings, used directly by
    /// tests so they don't need to mutate process environment.
    pub fn resolve(force_tags_raw: impl AsRef<str>, filter_tags_raw: impl AsRef<str>) -> Self {
        let force = parse_tag_list(force_tags_raw.as_ref());
        if !force.is_empty() {
            return Self::Forced(force);
        }
        let filter = parse_tag_list(filter_tags_raw.as_ref());
        if !filter.is_empty() {
            return Self::Filtered(filter);
        }
        Self::Unrestricted
    }

    /// Tags every new list must be auto-assigned (§4.6 effect 3). Empty
    /// outside `Forced` mode.
    pub fn auto_tags(&self) -> Vec<String> {
        match self {
            Self::Forced(tags) => tags.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether removing `tag` from a list must be rejected with
    /// `CannotRemoveForceTag` (§4.6 effect 4).
    pub fn forbids_tag_removal(&self, tag: &str) -> bool {
        match self {
            Self::Forced(tags) => tags.contains(&tag.to_lowercase()),
            _ => false,
        }
    }

    /// `true` if this scope requires every addressed list to carry ALL of
    /// its tags (AND semantics), i.e. force-tags mode is active.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Forced(_))
    }

    pub fn forced_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Forced(tags) => Some(tags),
            _ => None,
        }
    }

    pub fn filter_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Filtered(tags) => Some(tags),
            _ => None,
        }
    }
}

fn parse_tag_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Façade configuration: where the database lives plus the resolved
/// Access Scope. `db_path` defaults to `TODOIT_DB_PATH` (expanding `$VARS`
/// the way the original's `os.path.expandvars` does), matching
/// `manager_base.py`'s explicit-configuration requirement.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub access_scope: AccessScope,
}

impl Config {
    pub fn from_env(default_db_path: &str) -> Self {
        let db_path = std::env::var("TODOIT_DB_PATH").unwrap_or_else(|_| default_db_path.to_string());
        Self {
            db_path: expand_env(&db_path),
            access_scope: AccessScope::from_env(),
        }
    }
}

/// Minimal `$VAR`/`${VAR}` expansion over the current process environment,
/// matching `os.path.expandvars` closely enough for database-path use.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced {
            if chars.peek() == Some(&'}') {
                chars.next();
            }
        }
        if name.is_empty() {
            out.push('$');
            if braced {
                out.push('{');
            }
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_tags_overrides_filter_tags() {
        let scope = AccessScope::resolve(" Dev, Test ,", "other");
        assert!(scope.is_forced());
        assert_eq!(
            scope.forced_tags().unwrap().iter().collect::<Vec<_>>(),
            vec!["dev", "test"]
        );
    }

    #[test]
    fn filter_tags_used_when_force_empty() {
        let scope = AccessScope::resolve("", "Alpha,beta");
        assert!(!scope.is_forced());
        assert_eq!(
            scope.filter_tags().unwrap().iter().collect::<Vec<_>>(),
            vec!["alpha", "beta"]
        );
    }

    #[test]
    fn empty_both_is_unrestricted() {
        assert_eq!(AccessScope::resolve("", ""), AccessScope::Unrestricted);
    }

    #[test]
    fn auto_tags_only_in_forced_mode() {
        let forced = AccessScope::resolve("a,b", "");
        assert_eq!(forced.auto_tags().len(), 2);
        let filtered = AccessScope::resolve("", "a,b");
        assert!(filtered.auto_tags().is_empty());
    }

    #[test]
    fn forbids_removal_only_of_forced_tags() {
        let scope = AccessScope::resolve("dev,test", "");
        assert!(scope.forbids_tag_removal("dev"));
        assert!(!scope.forbids_tag_removal("other"));
    }

    #[test]
    fn expand_env_substitutes_braced_and_bare_vars() {
        // SAFETY: test-only mutation of the process environment for a
        // variable name unique to this test.
        unsafe {
            std::env::set_var("TODOIT_TEST_VAR_XYZ", "value");
        }
        assert_eq!(expand_env("$TODOIT_TEST_VAR_XYZ/db.sqlite"), "value/db.sqlite");
        assert_eq!(expand_env("${TODOIT_TEST_VAR_XYZ}/db.sqlite"), "value/db.sqlite");
        unsafe {
            std::env::remove_var("TODOIT_TEST_VAR_XYZ");
        }
    }
}
