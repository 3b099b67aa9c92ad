//! Announce line extraction.
//!
//! One rule is applied to one line at a time; the caller owns the variable
//! set so a multi-line announcement accumulates into a single map.

use std::collections::HashMap;

use regex::Regex;

use crate::definition::ExtractionMode;
use crate::error::ExtractError;

/// Variables captured from one announcement.
pub type Vars = HashMap<String, String>;

/// Apply `pattern` to `line`, writing captures into `vars`.
///
/// Returns `Ok(false)` when a positional pattern does not match. Named-scan
/// rules always report a match. With `ignore` set a matching line writes
/// nothing.
pub fn extract_line(
    pattern: &str,
    mode: &ExtractionMode,
    vars: &mut Vars,
    line: &str,
    ignore: bool,
) -> Result<bool, ExtractError> {
    match mode {
        ExtractionMode::Positional(names) => extract_positional(pattern, names, vars, line, ignore),
        ExtractionMode::NamedScan => scan_named(pattern, vars, line, ignore),
    }
}

/// Compile `pattern` with optional inline flags. Errors name the rule's own
/// pattern, not the flagged one.
fn compile(pattern: &str, flags: &str) -> Result<Regex, ExtractError> {
    Regex::new(&format!("{flags}{pattern}")).map_err(|source| ExtractError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn extract_positional(
    pattern: &str,
    names: &[String],
    vars: &mut Vars,
    line: &str,
    ignore: bool,
) -> Result<bool, ExtractError> {
    let re = compile(pattern, "")?;
    let Some(caps) = re.captures(line) else {
        return Ok(false);
    };
    if ignore {
        return Ok(true);
    }

    for (idx, name) in names.iter().enumerate() {
        // Optional groups that did not participate are stored empty.
        let value = caps.get(idx + 1).map(|m| m.as_str()).unwrap_or("");
        vars.insert(name.clone(), value.to_string());
    }
    Ok(true)
}

fn scan_named(pattern: &str, vars: &mut Vars, line: &str, ignore: bool) -> Result<bool, ExtractError> {
    let re = compile(pattern, "(?mi)")?;
    if ignore {
        return Ok(true);
    }

    let names: Vec<Option<&str>> = re.capture_names().collect();
    for caps in re.captures_iter(line) {
        for (idx, name) in names.iter().enumerate() {
            let key = name.unwrap_or("raw");
            let value = caps.get(idx).map(|m| m.as_str()).unwrap_or("");
            vars.insert(key.to_string(), value.to_string());
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positional(names: &[&str]) -> ExtractionMode {
        ExtractionMode::Positional(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_positional_extracts_all_groups() {
        let mut vars = Vars::new();
        let matched = extract_line(
            r"New Torrent Announcement:\s*<([^>]*)>\s*Name:'(.*)' uploaded by '([^']*)'",
            &positional(&["category", "torrentName", "uploader"]),
            &mut vars,
            "New Torrent Announcement: <PC :: Iso>  Name:'debian live 10 6 0 amd64 standard iso' uploaded by 'Anonymous'",
            false,
        )
        .unwrap();

        assert!(matched);
        assert_eq!(vars.len(), 3);
        assert_eq!(vars["category"], "PC :: Iso");
        assert_eq!(vars["torrentName"], "debian live 10 6 0 amd64 standard iso");
        assert_eq!(vars["uploader"], "Anonymous");
    }

    #[test]
    fn test_positional_optional_group_stored_empty() {
        let mut vars = Vars::new();
        let matched = extract_line(
            r"^(\w+)(?: \[(\w+)\])? by (\w+)$",
            &positional(&["title", "tag", "uploader"]),
            &mut vars,
            "Album by someone",
            false,
        )
        .unwrap();

        assert!(matched);
        assert_eq!(vars["title"], "Album");
        assert_eq!(vars["tag"], "");
        assert_eq!(vars["uploader"], "someone");
    }

    #[test]
    fn test_positional_no_match() {
        let mut vars = Vars::new();
        let matched = extract_line(r"^Name: (.*)$", &positional(&["name"]), &mut vars, "Size: 1GB", false)
            .unwrap();
        assert!(!matched);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_ignore_writes_nothing() {
        let mut vars = Vars::new();
        vars.insert("kept".into(), "value".into());

        let positional_match =
            extract_line(r"^-+ (\w+) -+$", &positional(&["section"]), &mut vars, "--- header ---", true)
                .unwrap();
        let scan_match =
            extract_line(r"(?P<section>\w+)", &ExtractionMode::NamedScan, &mut vars, "--- header ---", true)
                .unwrap();

        assert!(positional_match);
        assert!(scan_match);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["kept"], "value");
    }

    #[test]
    fn test_named_scan_case_insensitive_all_matches() {
        let mut vars = Vars::new();
        let matched = extract_line(
            r"(?P<key>size|tags): (?P<value>\S+)",
            &ExtractionMode::NamedScan,
            &mut vars,
            "SIZE: 1.4GB TAGS: flac,24bit",
            false,
        )
        .unwrap();

        assert!(matched);
        // Later matches overwrite earlier ones; the whole match lands in `raw`.
        assert_eq!(vars["key"], "TAGS");
        assert_eq!(vars["value"], "flac,24bit");
        assert_eq!(vars["raw"], "TAGS: flac,24bit");
    }

    #[test]
    fn test_named_scan_without_match_still_matches() {
        let mut vars = Vars::new();
        let matched =
            extract_line(r"(?P<id>\d+)", &ExtractionMode::NamedScan, &mut vars, "no digits", false).unwrap();
        assert!(matched);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let mut vars = Vars::new();
        let err = extract_line("(unclosed", &positional(&["a"]), &mut vars, "line", false).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));

        let err = extract_line("[z-a]", &ExtractionMode::NamedScan, &mut vars, "line", false).unwrap_err();
        assert!(matches!(err, ExtractError::InvalidPattern { ref pattern, .. } if pattern == "[z-a]"));
    }
}
