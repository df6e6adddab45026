// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolve `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A plain `${VAR}` that is unset (or set to an empty string) is an error;
/// the `:-` form substitutes the fallback instead. An unterminated `${`
/// is kept literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name.trim(), Some(fallback)),
            None => (reference.trim(), None),
        };

        if name.is_empty() {
            result.push_str(&rest[start..start + 2 + end + 1]);
        } else {
            match (lookup(name).filter(|v| !v.is_empty()), fallback) {
                (Some(value), _) => result.push_str(&value),
                (None, Some(fallback)) => result.push_str(fallback),
                (None, None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("api.example.com".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_defined_variables() {
        let out = resolve_with("https://${HOST}/v1", env).unwrap();
        assert_eq!(out, "https://api.example.com/v1");
    }

    #[test]
    fn fallback_used_when_unset_or_empty() {
        assert_eq!(resolve_with("${MISSING:-Ultrathink}", env).unwrap(), "Ultrathink");
        assert_eq!(resolve_with("${EMPTY:-x}", env).unwrap(), "x");
        assert_eq!(resolve_with("${HOST:-x}", env).unwrap(), "api.example.com");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = resolve_with("${MISSING}", env).unwrap_err();
        assert!(err.to_string().contains("${MISSING}"), "got: {err}");
    }

    #[test]
    fn malformed_references_are_literal() {
        assert_eq!(resolve_with("cost: ${", env).unwrap(), "cost: ${");
        assert_eq!(resolve_with("a ${} b", env).unwrap(), "a ${} b");
        assert_eq!(resolve_with("$HOST", env).unwrap(), "$HOST");
    }
}
