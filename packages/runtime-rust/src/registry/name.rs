//! Canonical instance names: `<FQN>:<local>`.
//!
//! Rust FQNs contain `::`, so the local-name separator is the last `:` that is
//! not part of a `::` pair.

use std::borrow::Cow;

use uuid::Uuid;

/// Local name used when a lookup or injection does not specify one.
pub const DEFAULT_LOCAL: &str = "default";

/// Builds the canonical name for an instance of `fqn`.
///
/// No local name yields a random token. A name that is already canonical for
/// `fqn` is kept as is.
#[must_use]
pub fn canonical_name(fqn: &str, local: Option<&str>) -> String {
    match local {
        None => format!("{fqn}:{}", Uuid::new_v4().simple()),
        Some(name) if is_canonical_for(fqn, name) => name.to_string(),
        Some(name) => format!("{fqn}:{name}"),
    }
}

/// Normalizes a lookup key: bare class names get the `:default` suffix.
#[must_use]
pub fn lookup_key(name: &str) -> Cow<'_, str> {
    if separator_index(name).is_some() {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}:{DEFAULT_LOCAL}"))
    }
}

/// Splits a canonical name into `(fqn, local)`.
#[must_use]
pub fn split(name: &str) -> Option<(&str, &str)> {
    let idx = separator_index(name)?;
    Some((&name[..idx], &name[idx + 1..]))
}

fn is_canonical_for(fqn: &str, name: &str) -> bool {
    name.strip_prefix(fqn)
        .is_some_and(|rest| rest.starts_with(':') && !rest.starts_with("::"))
}

fn separator_index(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    (0..bytes.len()).rev().find(|&i| {
        bytes[i] == b':'
            && (i == 0 || bytes[i - 1] != b':')
            && bytes.get(i + 1) != Some(&b':')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_name_is_prefixed_with_fqn() {
        assert_eq!(canonical_name("app::Mailer", Some("primary")), "app::Mailer:primary");
    }

    #[test]
    fn canonical_name_is_kept() {
        assert_eq!(
            canonical_name("app::Mailer", Some("app::Mailer:primary")),
            "app::Mailer:primary"
        );
    }

    #[test]
    fn missing_local_name_generates_unique_tokens() {
        let a = canonical_name("app::Mailer", None);
        let b = canonical_name("app::Mailer", None);
        assert_ne!(a, b);
        assert!(a.starts_with("app::Mailer:"));
        assert_eq!(split(&a).unwrap().0, "app::Mailer");
    }

    #[test]
    fn lookup_key_appends_default_to_bare_names() {
        assert_eq!(lookup_key("app::Mailer"), "app::Mailer:default");
        assert_eq!(lookup_key("Mailer"), "Mailer:default");
        assert_eq!(lookup_key("app::Mailer:primary"), "app::Mailer:primary");
    }

    #[test]
    fn split_ignores_path_separators() {
        assert_eq!(
            split("crate::jobs::Sweep:nightly"),
            Some(("crate::jobs::Sweep", "nightly"))
        );
        assert_eq!(split("crate::jobs::Sweep"), None);
    }
}
