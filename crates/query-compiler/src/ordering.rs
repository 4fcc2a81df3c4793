use flexquery_core_types::{DenialKind, FieldPath, FlexError, FlexResult};
use flexquery_policy_center::KeyGrant;
use serde::{Serialize, Serializer};

use crate::paths::{ExclusionSource, PathResolver, ResolvedPath};

#[derive(Clone, Debug, PartialEq)]
pub struct OrderTerm {
    pub path: ResolvedPath,
    pub descending: bool,
}

impl OrderTerm {
    /// Dotted key with its sign, as a caller would write it.
    pub fn key(&self) -> String {
        if self.descending {
            format!("-{}", self.path)
        } else {
            self.path.to_string()
        }
    }

    pub fn lookup(&self) -> String {
        if self.descending {
            format!("-{}", self.path.lookup())
        } else {
            self.path.lookup()
        }
    }
}

impl Serialize for OrderTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

/// Validates and resolves order keys. Ascending and descending are separate grants.
pub fn compile_ordering(
    resolver: &PathResolver<'_>,
    entity: &str,
    keys: &[String],
    allowlist: Option<&KeyGrant>,
    exclusions: Option<&dyn ExclusionSource>,
) -> FlexResult<Vec<OrderTerm>> {
    let mut terms = Vec::with_capacity(keys.len());
    for raw in keys {
        let key = raw.trim();
        let (descending, dotted) = match key.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, key),
        };
        let path = FieldPath::parse(dotted)?;
        resolver.check_depth(entity, &path)?;

        if let Some(allowlist) = allowlist {
            if !allowlist.allows(key) {
                return Err(FlexError::denied(DenialKind::Order, key));
            }
        }

        let resolved = resolver.resolve(entity, &path)?;
        if let Some(exclusions) = exclusions {
            if resolver.is_excluded(&resolved, exclusions) {
                return Err(FlexError::denied(DenialKind::Order, key));
            }
        }
        terms.push(OrderTerm {
            path: resolved,
            descending,
        });
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::blog_schema;
    use flexquery_core_types::ErrorKind;

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn direction_is_part_of_the_grant() {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        let grant = KeyGrant::only(["-created_at"]);

        let terms = compile_ordering(
            &resolver,
            "article",
            &keys(&["-created_at"]),
            Some(&grant),
            None,
        )
        .unwrap();
        assert!(terms[0].descending);
        assert_eq!(terms[0].key(), "-created_at");

        let err = compile_ordering(&resolver, "article", &keys(&["created_at"]), Some(&grant), None)
            .unwrap_err();
        assert_eq!(err, FlexError::denied(DenialKind::Order, "created_at"));
    }

    #[test]
    fn relation_keys_use_store_lookup() {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        let terms = compile_ordering(
            &resolver,
            "article",
            &keys(&["-author.name", "title"]),
            Some(&KeyGrant::Full),
            None,
        )
        .unwrap();
        assert_eq!(terms[0].lookup(), "-author__name");
        assert_eq!(terms[1].lookup(), "title");
    }

    #[test]
    fn rejects_empty_and_unknown_keys() {
        let schema = blog_schema();
        let resolver = PathResolver::new(&schema, 2);
        for bad in ["-", "", "missing"] {
            let err = compile_ordering(&resolver, "article", &keys(&[bad]), None, None)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }
}
