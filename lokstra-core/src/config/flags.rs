//! Command-line flag parsing for the default `NAME` placeholder resolver
//! (spec §4.1: "command-line flags (`-KEY=v`, `--KEY v`, case-insensitive)").

use std::collections::HashMap;

/// Parse a slice of CLI arguments (typically `std::env::args().skip(1)`)
/// into a case-insensitive `KEY -> value` map.
///
/// Accepted forms:
/// - `-KEY=value` / `--KEY=value`
/// - `-KEY value` / `--KEY value` (next argument is consumed as the value)
/// - `-KEY` / `--KEY` with no following value defaults to `"true"`
///
/// Keys are stored upper-cased so lookups are case-insensitive.
pub fn parse_flags<I, S>(args: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
    let mut out = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let Some(stripped) = strip_dashes(arg) else {
            i += 1;
            continue;
        };

        if let Some((key, value)) = stripped.split_once('=') {
            out.insert(key.to_uppercase(), value.to_string());
            i += 1;
            continue;
        }

        match args.get(i + 1) {
            Some(next) if strip_dashes(next).is_none() => {
                out.insert(stripped.to_uppercase(), next.clone());
                i += 2;
            }
            _ => {
                out.insert(stripped.to_uppercase(), "true".to_string());
                i += 1;
            }
        }
    }
    out
}

fn strip_dashes(arg: &str) -> Option<&str> {
    arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_form() {
        let flags = parse_flags(["--DB_HOST=localhost", "-port=8080"]);
        assert_eq!(flags.get("DB_HOST").map(String::as_str), Some("localhost"));
        assert_eq!(flags.get("PORT").map(String::as_str), Some("8080"));
    }

    #[test]
    fn parses_space_separated_form() {
        let flags = parse_flags(["--db_host", "localhost"]);
        assert_eq!(flags.get("DB_HOST").map(String::as_str), Some("localhost"));
    }

    #[test]
    fn bare_flag_defaults_to_true() {
        let flags = parse_flags(["--verbose"]);
        assert_eq!(flags.get("VERBOSE").map(String::as_str), Some("true"));
    }

    #[test]
    fn is_case_insensitive_on_lookup_key() {
        let flags = parse_flags(["--Db_Port=5432"]);
        assert_eq!(flags.get("DB_PORT").map(String::as_str), Some("5432"));
    }
}
