//! Final assembly of release fields from captured variables.
//!
//! Templates use `{{ .name }}` placeholders. Missing variables render as
//! an empty string.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::definition::MatchTemplate;
use crate::error::TemplateError;
use crate::extract::Vars;

/// Everything except the characters a query value may carry unescaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Release fields rendered from one completed variable set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembled {
    /// Captured variables with settings merged over them (not escaped).
    pub vars: Vars,
    pub torrent_url: String,
    pub torrent_name: String,
    pub info_url: String,
}

/// Escape a value for use inside a URL query: spaces become `+`.
pub fn query_escape(value: &str) -> String {
    value
        .split(' ')
        .map(|part| utf8_percent_encode(part, QUERY_VALUE).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

/// Substitute `{{ .name }}` placeholders in `template`.
///
/// `{{- ` and ` -}}` trim the whitespace of the neighbouring text.
pub fn render(template: &str, vars: &Vars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError::Unterminated(offset + start));
        };

        let mut expr = &after_open[..end];
        let trim_before = expr
            .strip_prefix('-')
            .is_some_and(|e| e.starts_with(char::is_whitespace));
        let trim_after = expr
            .strip_suffix('-')
            .is_some_and(|e| e.ends_with(char::is_whitespace));
        if trim_before {
            expr = &expr[1..];
        }
        if trim_after {
            expr = &expr[..expr.len() - 1];
        }
        let expr = expr.trim();

        let text = &rest[..start];
        out.push_str(if trim_before { text.trim_end() } else { text });

        let name = expr
            .strip_prefix('.')
            .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_alphanumeric() || c == '_'))
            .ok_or_else(|| TemplateError::Unsupported(expr.to_string()))?;
        out.push_str(vars.get(name).map(|s| s.as_str()).unwrap_or(""));

        let mut consumed = start + 2 + end + 2;
        if trim_after {
            let remaining = &rest[consumed..];
            consumed += remaining.len() - remaining.trim_start().len();
        }
        offset += consumed;
        rest = &rest[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Merge `settings` over `captured`, escape the `encode` variables and
/// render every non-empty template.
pub fn assemble(
    template: &MatchTemplate,
    captured: &Vars,
    settings: &HashMap<String, String>,
) -> Result<Assembled, TemplateError> {
    let mut merged = captured.clone();
    merged.extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut escaped = merged.clone();
    for name in &template.encode {
        if let Some(value) = escaped.get_mut(name) {
            *value = query_escape(value);
        }
    }

    let render_field = |source: &str| -> Result<String, TemplateError> {
        if source.is_empty() {
            Ok(String::new())
        } else {
            render(source, &escaped)
        }
    };

    Ok(Assembled {
        torrent_url: render_field(&template.torrent_url)?,
        info_url: render_field(&template.info_url)?,
        torrent_name: render_field(&template.torrent_name)?,
        vars: merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_assemble_encodes_selected_settings() {
        let captured = vars(&[("baseUrl", "https://example.test/"), ("torrentId", "000000")]);
        let settings: HashMap<String, String> =
            [("apikey".to_string(), "abababab+01010101".to_string())].into();
        let template = MatchTemplate {
            torrent_url: "{{.baseUrl}}api/v1/torrents/{{.torrentId}}/torrent?key={{.apikey}}".into(),
            encode: vec!["apikey".into()],
            ..Default::default()
        };

        let assembled = assemble(&template, &captured, &settings).unwrap();
        assert_eq!(
            assembled.torrent_url,
            "https://example.test/api/v1/torrents/000000/torrent?key=abababab%2B01010101"
        );
        assert_eq!(assembled.vars["apikey"], "abababab+01010101");
        assert_eq!(assembled.info_url, "");
    }

    #[test]
    fn test_settings_override_captured() {
        let captured = vars(&[("passkey", "from-line")]);
        let settings: HashMap<String, String> = [("passkey".to_string(), "configured".to_string())].into();
        let template = MatchTemplate {
            torrent_url: "https://t.test/dl?pk={{ .passkey }}".into(),
            ..Default::default()
        };
        let assembled = assemble(&template, &captured, &settings).unwrap();
        assert_eq!(assembled.torrent_url, "https://t.test/dl?pk=configured");
    }

    #[test]
    fn test_render_missing_var_is_empty() {
        let out = render("{{ .name }}-{{.missing}}!", &vars(&[("name", "x")])).unwrap();
        assert_eq!(out, "x-!");
    }

    #[test]
    fn test_render_trim_markers() {
        let v = vars(&[("a", "v"), ("b", "w")]);
        assert_eq!(render("[{{- .a -}}]", &v).unwrap(), "[v]");
        assert_eq!(render("x  {{- .a -}}\n\t y", &v).unwrap(), "xvy");
        assert_eq!(render("x {{- .a }} y", &v).unwrap(), "xv y");
        assert_eq!(render("x {{ .a -}} y", &v).unwrap(), "x vy");
        assert_eq!(render("{{ .a }} {{- .b }}", &v).unwrap(), "vw");
    }

    #[test]
    fn test_render_errors() {
        assert_eq!(
            render("ok {{ .a", &Vars::new()),
            Err(TemplateError::Unterminated(3))
        );
        assert_eq!(
            render("{{ upper .a }}", &Vars::new()),
            Err(TemplateError::Unsupported("upper .a".into()))
        );
    }

    #[test]
    fn test_query_escape() {
        assert_eq!(query_escape("a b+c/d~e_f.g-h"), "a+b%2Bc%2Fd~e_f.g-h");
        assert_eq!(query_escape("ünï"), "%C3%BCn%C3%AF");
    }
}
