// src/planner/entities.rs — Lightweight entity extraction from request text

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Url,
    Email,
    Field,
    Quoted,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Url => "url",
            EntityKind::Email => "email",
            EntityKind::Field => "field",
            EntityKind::Quoted => "quoted",
        })
    }
}

/// Entities found in a request, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub urls: Vec<String>,
    pub emails: Vec<String>,
    pub fields: Vec<String>,
    pub quoted: Vec<String>,
}

impl Entities {
    pub fn of_kind(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Url => &self.urls,
            EntityKind::Email => &self.emails,
            EntityKind::Field => &self.fields,
            EntityKind::Quoted => &self.quoted,
        }
    }

    pub fn get(&self, kind: EntityKind, index: usize) -> Option<&str> {
        self.of_kind(kind).get(index).map(String::as_str)
    }

    /// Which entity, if any, a literal parameter value came from.
    pub fn find(&self, value: &str) -> Option<(EntityKind, usize)> {
        let needle = value.trim();
        if needle.is_empty() {
            return None;
        }
        for kind in [
            EntityKind::Url,
            EntityKind::Email,
            EntityKind::Quoted,
            EntityKind::Field,
        ] {
            let hit = self.of_kind(kind).iter().position(|e| match kind {
                EntityKind::Url => same_url(e, needle),
                EntityKind::Field => e.eq_ignore_ascii_case(needle),
                _ => e == needle,
            });
            if let Some(i) = hit {
                return Some((kind, i));
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.emails.is_empty()
            && self.fields.is_empty()
            && self.quoted.is_empty()
    }
}

fn same_url(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Pulls URLs, emails, field names and quoted strings out of free text.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Entities;
}

/// Rule-based extractor: no model, no network.
#[derive(Debug, Clone, Default)]
pub struct RuleExtractor;

const FIELD_VERBS: &[&str] = &["extract", "scrape", "get", "collect", "pull", "find", "fetch"];
const FIELD_STOPS: &[&str] = &["from", "on", "at", "in", "of", "for", "into", "to", "off"];
const FIELD_FILLER: &[&str] = &["the", "all", "every", "each", "a", "an", "any", "their", "its"];

impl EntityExtractor for RuleExtractor {
    fn extract(&self, text: &str) -> Entities {
        let mut entities = Entities {
            quoted: extract_quoted(text),
            ..Entities::default()
        };

        for raw in text.split_whitespace() {
            let token = raw.trim_matches(|c: char| {
                matches!(c, ',' | ';' | ':' | '(' | ')' | '<' | '>' | '"' | '\'' | '!' | '?')
            });
            let token = token.trim_end_matches('.');
            if token.is_empty() {
                continue;
            }
            if let Some(email) = as_email(token) {
                push_unique(&mut entities.emails, email);
            } else if let Some(url) = as_url(token) {
                push_unique(&mut entities.urls, url);
            }
        }

        entities.fields = extract_fields(text);
        entities
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn extract_quoted(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Option<String> = None;
    for c in text.chars() {
        match (c, current.as_mut()) {
            ('"' | '“' | '”', None) => current = Some(String::new()),
            ('"' | '“' | '”', Some(buf)) => {
                let value = buf.trim().to_string();
                if !value.is_empty() {
                    push_unique(&mut out, value);
                }
                current = None;
            }
            (_, Some(buf)) => buf.push(c),
            (_, None) => {}
        }
    }
    out
}

fn as_email(token: &str) -> Option<String> {
    let (local, domain) = token.split_once('@')?;
    if local.is_empty() || domain.contains('@') || !looks_like_domain(domain) {
        return None;
    }
    Some(token.to_string())
}

/// Absolute http(s) URLs as written; bare domains get an `https://` scheme.
fn as_url(token: &str) -> Option<String> {
    if token.starts_with("http://") || token.starts_with("https://") {
        let parsed = url::Url::parse(token).ok()?;
        parsed.host_str()?;
        return Some(token.to_string());
    }
    let host = token.split('/').next().unwrap_or(token);
    if !looks_like_domain(host) {
        return None;
    }
    let candidate = format!("https://{token}");
    url::Url::parse(&candidate).ok()?;
    Some(candidate)
}

fn looks_like_domain(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return false;
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && labels
            .iter()
            .all(|l| l.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// Nouns following an extraction verb, up to a preposition or the end of the clause.
/// "extract the titles and prices from x" -> ["titles", "prices"].
fn extract_fields(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let bare = words[i].trim_matches(|c: char| !c.is_alphanumeric());
        if !FIELD_VERBS.contains(&bare) {
            i += 1;
            continue;
        }
        i += 1;
        let mut current: Vec<&str> = Vec::new();
        while i < words.len() {
            let raw = words[i].as_str();
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-');
            if FIELD_STOPS.contains(&word)
                || FIELD_VERBS.contains(&word)
                || word.contains('.')
                || word.contains('@')
                || raw.starts_with('"')
            {
                break;
            }
            if word == "and" || word.is_empty() {
                flush_field(&mut current, &mut out);
            } else if !FIELD_FILLER.contains(&word) {
                current.push(word);
            }
            if raw.ends_with(',') {
                flush_field(&mut current, &mut out);
            }
            i += 1;
        }
        flush_field(&mut current, &mut out);
    }
    out
}

fn flush_field(current: &mut Vec<&str>, out: &mut Vec<String>) {
    if !current.is_empty() {
        push_unique(out, current.join(" "));
        current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extracts_urls_and_fields() {
        let e = RuleExtractor.extract("Extract titles and prices from https://shop.example.com/list");
        assert_eq!(e.urls, vec!["https://shop.example.com/list"]);
        assert_eq!(e.fields, vec!["titles", "prices"]);
    }

    #[test]
    fn test_bare_domain_gets_scheme() {
        let e = RuleExtractor.extract("scrape product names from example.com.");
        assert_eq!(e.urls, vec!["https://example.com"]);
        assert_eq!(e.fields, vec!["product names"]);
    }

    #[test]
    fn test_emails_not_counted_as_urls() {
        let e = RuleExtractor.extract("send results to ops@example.com and cc lead@example.org");
        assert_eq!(e.emails, vec!["ops@example.com", "lead@example.org"]);
        assert!(e.urls.is_empty());
    }

    #[test]
    fn test_quoted_strings() {
        let e = RuleExtractor.extract(r#"find rows containing "Acme Corp" or “Globex”"#);
        assert_eq!(e.quoted, vec!["Acme Corp", "Globex"]);
    }

    #[test]
    fn test_comma_separated_fields() {
        let e = RuleExtractor.extract("get the name, email, phone from the staff page");
        assert_eq!(e.fields, vec!["name", "email", "phone"]);
    }

    #[test]
    fn test_plain_words_are_not_domains() {
        let e = RuleExtractor.extract("version 1.2 of the report. Done");
        assert!(e.urls.is_empty());
    }

    #[test]
    fn test_find_matches_url_with_trailing_slash() {
        let e = RuleExtractor.extract("scrape titles from https://a.example.com");
        assert_eq!(e.find("https://a.example.com/"), Some((EntityKind::Url, 0)));
        assert_eq!(e.find("Titles"), Some((EntityKind::Field, 0)));
        assert_eq!(e.find("unrelated"), None);
    }
}
