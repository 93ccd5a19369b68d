use std::sync::OnceLock;

use regex::Regex;

/// Expand `{{ env.VAR }}` placeholders in raw TOML text
///
/// `{{ env.VAR | default("fallback") }}` substitutes the fallback when the
/// variable is unset. Expansion runs on the raw text before
/// deserialization so config structs hold plain strings; TOML comment
/// lines are passed through untouched.
pub fn expand_env(input: &str) -> Result<String, String> {
    fn placeholder() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| {
            Regex::new(r#"\{\{\s*env\.([A-Za-z0-9_]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
                .expect("placeholder pattern is valid")
        })
    }

    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut cursor = 0;
        for captures in placeholder().captures_iter(line) {
            let whole = captures.get(0).expect("group 0 always present");
            let var = &captures[1];

            output.push_str(&line[cursor..whole.start()]);

            match std::env::var(var) {
                Ok(value) => output.push_str(&value),
                Err(_) => match captures.get(2) {
                    Some(fallback) => output.push_str(fallback.as_str()),
                    None => return Err(format!("environment variable not found: `{var}`")),
                },
            }

            cursor = whole.end();
        }
        output.push_str(&line[cursor..]);
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let input = "port = 8080\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn substitutes_set_variable() {
        temp_env::with_var("PLEXUS_TEST_KEY", Some("sk-123"), || {
            let out = expand_env("api_key = \"{{ env.PLEXUS_TEST_KEY }}\"").unwrap();
            assert_eq!(out, "api_key = \"sk-123\"");
        });
    }

    #[test]
    fn missing_variable_is_an_error() {
        temp_env::with_var_unset("PLEXUS_TEST_MISSING", || {
            let err = expand_env("k = \"{{ env.PLEXUS_TEST_MISSING }}\"").unwrap_err();
            assert!(err.contains("PLEXUS_TEST_MISSING"));
        });
    }

    #[test]
    fn default_covers_missing_variable() {
        temp_env::with_var_unset("PLEXUS_TEST_OPT", || {
            let out =
                expand_env("k = \"{{ env.PLEXUS_TEST_OPT | default(\"none\") }}\"").unwrap();
            assert_eq!(out, "k = \"none\"");
        });
    }

    #[test]
    fn set_variable_wins_over_default() {
        temp_env::with_var("PLEXUS_TEST_OPT2", Some("real"), || {
            let out =
                expand_env("k = \"{{ env.PLEXUS_TEST_OPT2 | default(\"none\") }}\"").unwrap();
            assert_eq!(out, "k = \"real\"");
        });
    }

    #[test]
    fn comment_lines_are_not_expanded() {
        temp_env::with_var_unset("PLEXUS_TEST_MISSING2", || {
            let input = "# k = \"{{ env.PLEXUS_TEST_MISSING2 }}\"";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }

    #[test]
    fn multiple_placeholders_on_one_line() {
        temp_env::with_vars([("PLEXUS_A", Some("a")), ("PLEXUS_B", Some("b"))], || {
            let out = expand_env("k = \"{{ env.PLEXUS_A }}:{{ env.PLEXUS_B }}\"").unwrap();
            assert_eq!(out, "k = \"a:b\"");
        });
    }
}
