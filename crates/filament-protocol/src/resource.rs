//! Resource patterns and their params.
//!
//! A resource is a URL-like pattern, possibly containing `:name` segments:
//! `/posts/:postId/comments/:commentId`. The `:name` set defines the param
//! arity of the pattern; a request must supply exactly those keys.
//!
//! Substituting every `:name` with its concrete value yields the *resolved
//! resource key* — the string both endpoints use to identify one concrete
//! instance of a pattern. Two requests with the same pattern and the same
//! params always resolve to the same key, which is what makes it usable as
//! the server's registry key and the client's cache key.

use crate::Params;

/// Returns the `:name` segments of a pattern, in order of appearance.
pub fn param_names(pattern: &str) -> Vec<&str> {
    pattern
        .split('/')
        .filter_map(|segment| segment.strip_prefix(':'))
        .collect()
}

/// Substitutes every `:name` segment with its value from `params`.
///
/// Patterns without params pass through unchanged. Keys missing from
/// `params` are left as-is; [`validate_params`] is expected to have run
/// first, so that case never reaches the wire in practice.
pub fn resource_with_params(pattern: &str, params: Option<&Params>) -> String {
    let Some(params) = params else {
        return pattern.to_string();
    };
    pattern
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => params
                .get(name)
                .map(String::as_str)
                .unwrap_or(segment),
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Checks that the supplied param keys exactly match the pattern's
/// `:name` set — both arity and names.
///
/// A pattern without params accepts `None` or an empty map.
pub fn validate_params(pattern: &str, params: Option<&Params>) -> bool {
    let names = param_names(pattern);
    match params {
        None => names.is_empty(),
        Some(params) => {
            params.len() == names.len()
                && names.iter().all(|name| params.contains_key(*name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_param_names_plain_pattern_is_empty() {
        assert!(param_names("/posts").is_empty());
    }

    #[test]
    fn test_param_names_extracts_each_segment() {
        assert_eq!(
            param_names("/posts/:postId/comments/:commentId"),
            vec!["postId", "commentId"]
        );
    }

    #[test]
    fn test_resource_with_params_substitutes_values() {
        let p = params(&[("postId", "42"), ("commentId", "7")]);
        assert_eq!(
            resource_with_params("/posts/:postId/comments/:commentId", Some(&p)),
            "/posts/42/comments/7"
        );
    }

    #[test]
    fn test_resource_with_params_without_params_passes_through() {
        assert_eq!(resource_with_params("/posts", None), "/posts");
    }

    #[test]
    fn test_resource_with_params_same_inputs_same_key() {
        let a = params(&[("postId", "42")]);
        let b = params(&[("postId", "42")]);
        assert_eq!(
            resource_with_params("/posts/:postId", Some(&a)),
            resource_with_params("/posts/:postId", Some(&b)),
        );
    }

    #[test]
    fn test_validate_params_no_params_expected_accepts_none() {
        assert!(validate_params("/posts", None));
    }

    #[test]
    fn test_validate_params_no_params_expected_accepts_empty_map() {
        assert!(validate_params("/posts", Some(&Params::new())));
    }

    #[test]
    fn test_validate_params_missing_params_rejected() {
        assert!(!validate_params("/posts/:postId", None));
    }

    #[test]
    fn test_validate_params_exact_match_accepted() {
        let p = params(&[("postId", "1")]);
        assert!(validate_params("/posts/:postId", Some(&p)));
    }

    #[test]
    fn test_validate_params_wrong_arity_rejected() {
        let p = params(&[("postId", "1"), ("extra", "2")]);
        assert!(!validate_params("/posts/:postId", Some(&p)));
    }

    #[test]
    fn test_validate_params_wrong_key_name_rejected() {
        // Same arity, different key — still invalid.
        let p = params(&[("commentId", "1")]);
        assert!(!validate_params("/posts/:postId", Some(&p)));
    }

    #[test]
    fn test_validate_params_multi_param_pattern() {
        let good = params(&[("a", "1"), ("b", "2")]);
        let bad = params(&[("a", "1"), ("c", "2")]);
        assert!(validate_params("/x/:a/y/:b", Some(&good)));
        assert!(!validate_params("/x/:a/y/:b", Some(&bad)));
    }
}
