use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SharkError};

pub const EPIC_KEY_SHAPE: &str = "E<nn>";
pub const FEATURE_KEY_SHAPE: &str = "E<nn>-F<nn>";
pub const TASK_KEY_SHAPE: &str = "T-E<nn>-F<nn>-<nnn>";

const SLUG_MAX_LEN: usize = 50;

fn epic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^E(\d{2,})$").unwrap())
}

fn feature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(E\d{2,})-F(\d{2,})$").unwrap())
}

fn task_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T-(E\d{2,}-F\d{2,})-(\d{3,})$").unwrap())
}

/// Validate an epic key, returning its ordinal.
pub fn parse_epic_key(key: &str) -> Result<u32> {
    let caps = epic_re()
        .captures(key)
        .ok_or_else(|| SharkError::InvalidKey(key.to_string(), EPIC_KEY_SHAPE.to_string()))?;
    caps[1]
        .parse()
        .map_err(|_| SharkError::InvalidKey(key.to_string(), EPIC_KEY_SHAPE.to_string()))
}

/// Validate a feature key, returning (epic key, feature ordinal).
pub fn parse_feature_key(key: &str) -> Result<(String, u32)> {
    let caps = feature_re()
        .captures(key)
        .ok_or_else(|| SharkError::InvalidKey(key.to_string(), FEATURE_KEY_SHAPE.to_string()))?;
    let ordinal = caps[2]
        .parse()
        .map_err(|_| SharkError::InvalidKey(key.to_string(), FEATURE_KEY_SHAPE.to_string()))?;
    Ok((caps[1].to_string(), ordinal))
}

/// Validate a task key, returning (feature key, task ordinal).
pub fn parse_task_key(key: &str) -> Result<(String, u32)> {
    let caps = task_re()
        .captures(key)
        .ok_or_else(|| SharkError::InvalidKey(key.to_string(), TASK_KEY_SHAPE.to_string()))?;
    let ordinal = caps[2]
        .parse()
        .map_err(|_| SharkError::InvalidKey(key.to_string(), TASK_KEY_SHAPE.to_string()))?;
    Ok((caps[1].to_string(), ordinal))
}

pub fn epic_key(ordinal: u32) -> String {
    format!("E{ordinal:02}")
}

pub fn feature_key(epic_key: &str, ordinal: u32) -> String {
    format!("{epic_key}-F{ordinal:02}")
}

pub fn task_key(feature_key: &str, ordinal: u32) -> String {
    format!("T-{feature_key}-{ordinal:03}")
}

/// Next epic key given the keys already allocated. Ordinals are max+1;
/// deleted keys are never reused.
pub fn next_epic_key<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(|k| parse_epic_key(k).ok())
        .max()
        .unwrap_or(0);
    epic_key(max + 1)
}

/// Next feature key under an epic, from the feature keys already allocated
/// anywhere in the store (keys under other epics are ignored).
pub fn next_feature_key<'a>(
    epic_key: &str,
    existing: impl IntoIterator<Item = &'a str>,
) -> String {
    let max = existing
        .into_iter()
        .filter_map(|k| parse_feature_key(k).ok())
        .filter(|(parent, _)| parent == epic_key)
        .map(|(_, ordinal)| ordinal)
        .max()
        .unwrap_or(0);
    feature_key(epic_key, max + 1)
}

/// Next task key under a feature.
pub fn next_task_key<'a>(
    feature_key: &str,
    existing: impl IntoIterator<Item = &'a str>,
) -> String {
    let max = existing
        .into_iter()
        .filter_map(|k| parse_task_key(k).ok())
        .filter(|(parent, _)| parent == feature_key)
        .map(|(_, ordinal)| ordinal)
        .max()
        .unwrap_or(0);
    task_key(feature_key, max + 1)
}

/// Lowercase, collapse whitespace/underscores to hyphens, drop anything
/// outside [a-z0-9-], collapse hyphen runs, trim edges, cap at 50 chars
/// (retrimming after truncation).
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_hyphen = true;
    for c in title.chars() {
        let c = match c {
            'A'..='Z' => c.to_ascii_lowercase(),
            'a'..='z' | '0'..='9' => c,
            c if c.is_whitespace() || c == '_' || c == '-' => '-',
            _ => continue,
        };
        if c == '-' {
            if !last_hyphen {
                slug.push('-');
                last_hyphen = true;
            }
        } else {
            slug.push(c);
            last_hyphen = false;
        }
    }
    let mut slug = slug.trim_matches('-').to_string();
    if slug.len() > SLUG_MAX_LEN {
        slug.truncate(SLUG_MAX_LEN);
        slug = slug.trim_matches('-').to_string();
    }
    slug
}

/// `key.md` when the title slugs to nothing, else `key-<slug>.md`.
pub fn filename_for(key: &str, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{key}.md")
    } else {
        format!("{key}-{slug}.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epic_keys_parse_and_format() {
        assert_eq!(parse_epic_key("E01").unwrap(), 1);
        assert_eq!(parse_epic_key("E123").unwrap(), 123);
        assert!(parse_epic_key("E1").is_err());
        assert!(parse_epic_key("e01").is_err());
        assert!(parse_epic_key("E01-F01").is_err());
        assert_eq!(epic_key(7), "E07");
        assert_eq!(epic_key(123), "E123");
    }

    #[test]
    fn feature_keys_parse_and_format() {
        assert_eq!(parse_feature_key("E01-F02").unwrap(), ("E01".into(), 2));
        assert!(parse_feature_key("E01-F2").is_err());
        assert!(parse_feature_key("E01").is_err());
        assert!(parse_feature_key("T-E01-F02-001").is_err());
        assert_eq!(feature_key("E01", 3), "E01-F03");
    }

    #[test]
    fn task_keys_parse_and_format() {
        assert_eq!(
            parse_task_key("T-E01-F02-001").unwrap(),
            ("E01-F02".into(), 1)
        );
        assert!(parse_task_key("T-E01-F02-01").is_err());
        assert!(parse_task_key("E01-F02-001").is_err());
        assert_eq!(task_key("E01-F02", 12), "T-E01-F02-012");
    }

    #[test]
    fn next_keys_are_max_plus_one() {
        assert_eq!(next_epic_key([]), "E01");
        assert_eq!(next_epic_key(["E01", "E03"]), "E04");
        assert_eq!(next_feature_key("E01", ["E01-F01", "E02-F09"]), "E01-F02");
        assert_eq!(
            next_task_key("E01-F01", ["T-E01-F01-001", "T-E01-F01-002"]),
            "T-E01-F01-003"
        );
    }

    #[test]
    fn deleted_ordinals_are_not_reused() {
        // T-...-001 was deleted; max of the remaining keys still wins.
        assert_eq!(
            next_task_key("E01-F01", ["T-E01-F01-002", "T-E01-F01-003"]),
            "T-E01-F01-004"
        );
    }

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Build login form"), "build-login-form");
        assert_eq!(slugify("  OAuth 2.0  flows "), "oauth-20-flows");
        assert_eq!(slugify("snake_case_title"), "snake-case-title");
        assert_eq!(slugify("a---b"), "a-b");
    }

    #[test]
    fn slugify_drops_disallowed_chars() {
        assert_eq!(slugify("C'est l'été!"), "cest-lt");
        assert_eq!(slugify("日本語"), "");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slugify_truncates_at_fifty_and_retrims() {
        let long = "a".repeat(49) + "-bcd";
        let slug = slugify(&long);
        assert!(slug.len() <= 50);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn filename_falls_back_to_bare_key() {
        assert_eq!(
            filename_for("T-E01-F01-001", "Build login form"),
            "T-E01-F01-001-build-login-form.md"
        );
        assert_eq!(filename_for("T-E01-F01-002", "!!!"), "T-E01-F01-002.md");
        assert_eq!(filename_for("T-E01-F01-003", ""), "T-E01-F01-003.md");
    }
}
