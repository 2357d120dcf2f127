//! `${NAME}` placeholder substitution.
//!
//! One engine serves two callers: the configuration loader (values resolve
//! from the process environment) and the config-file renderer (values resolve
//! from a map built out of the loaded configuration). `$${NAME}` escapes to
//! the literal `${NAME}`. Substitution is pure text: the same input and the
//! same bindings always produce byte-identical output.

use thiserror::Error;

/// A placeholder with no binding. Carries the variable name so the caller
/// can report exactly what is missing.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unresolved placeholder '${{{name}}}'")]
pub struct UnresolvedPlaceholder {
    /// Name inside the `${...}`.
    pub name: String,
}

/// Substitute every `${NAME}` in `input` using `lookup`.
///
/// `$${NAME}` produces the literal `${NAME}`. A `$` not followed by `{` is
/// passed through unchanged. An unterminated `${` is passed through verbatim
/// rather than rejected, matching what shells do with stray syntax.
///
/// # Errors
///
/// Returns [`UnresolvedPlaceholder`] for the first placeholder `lookup`
/// cannot resolve.
pub fn substitute<F>(input: &str, lookup: F) -> Result<String, UnresolvedPlaceholder>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after_escape) = tail.strip_prefix("$${") {
            // Escaped: emit a literal "${" and continue after it.
            out.push_str("${");
            rest = after_escape;
            continue;
        }

        if let Some(after_open) = tail.strip_prefix("${") {
            match after_open.find('}') {
                Some(end) => {
                    let name = &after_open[..end];
                    match lookup(name) {
                        Some(value) => out.push_str(&value),
                        None => {
                            return Err(UnresolvedPlaceholder {
                                name: name.to_string(),
                            })
                        }
                    }
                    rest = &after_open[end + 1..];
                }
                None => {
                    // Unterminated "${": pass through verbatim.
                    out.push_str(tail);
                    rest = "";
                }
            }
            continue;
        }

        // Lone '$'.
        out.push('$');
        rest = &tail[1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Substitute from the process environment. Used by the configuration loader.
pub fn substitute_env(input: &str) -> Result<String, UnresolvedPlaceholder> {
    substitute(input, |name| std::env::var(name).ok())
}
