//! Archive entry naming.

use rslug::slugify;
use std::collections::HashSet;

/// Longest stem kept from a title.
const MAX_STEM_LEN: usize = 64;

/// Stem used when a title sanitizes to nothing.
const FALLBACK_STEM: &str = "audio";

/// Turn a media title into a portable file stem: transliterated to ASCII,
/// lowercase, words joined by `-`, at most 64 characters.
pub fn safe_stem(title: &str) -> String {
    let slug: String = slugify!(title)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(MAX_STEM_LEN)
        .collect();
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        slug.to_string()
    }
}

/// Names already used in one archive.
#[derive(Debug, Default)]
pub struct UsedNames {
    names: HashSet<String>,
}

impl UsedNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `reserved` already taken.
    pub fn with_reserved<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: reserved.into_iter().map(Into::into).collect(),
        }
    }

    /// Claim `name`, or `stem_N.ext` with the smallest free `N >= 1` when it
    /// is taken.
    pub fn claim(&mut self, name: &str) -> String {
        if self.names.insert(name.to_string()) {
            return name.to_string();
        }

        let (stem, ext) = match name.rfind('.') {
            Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
            _ => (name, ""),
        };

        let mut n = 1usize;
        loop {
            let candidate = format!("{}_{}{}", stem, n, ext);
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_stem_basic() {
        assert_eq!(safe_stem("My Song"), "my-song");
        let stem = safe_stem("Rick Astley - Never Gonna Give You Up");
        assert!(stem.starts_with("rick-astley"));
        assert!(stem.ends_with("give-you-up"));
    }

    #[test]
    fn test_safe_stem_strips_unsafe_characters() {
        let stem = safe_stem("a/b\\c:d*e?f\"g<h>i|j");
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
        assert!(!stem.is_empty());
    }

    #[test]
    fn test_safe_stem_fallback() {
        assert_eq!(safe_stem(""), "audio");
        assert_eq!(safe_stem("!!! ???"), "audio");
    }

    #[test]
    fn test_safe_stem_truncates() {
        let stem = safe_stem(&"word ".repeat(40));
        assert!(stem.len() <= MAX_STEM_LEN);
        assert!(!stem.ends_with('-'));
    }

    #[test]
    fn test_used_names_suffixes_collisions() {
        let mut used = UsedNames::new();
        assert_eq!(used.claim("same-song.mp3"), "same-song.mp3");
        assert_eq!(used.claim("same-song.mp3"), "same-song_1.mp3");
        assert_eq!(used.claim("same-song.mp3"), "same-song_2.mp3");
        assert_eq!(used.claim("other.mp3"), "other.mp3");
    }

    #[test]
    fn test_used_names_reserved_and_extensionless() {
        let mut used = UsedNames::with_reserved(["failures.txt"]);
        assert!(used.contains("failures.txt"));
        assert_eq!(used.claim("failures.txt"), "failures_1.txt");
        assert_eq!(used.claim("README"), "README");
        assert_eq!(used.claim("README"), "README_1");
        assert_eq!(used.claim(".hidden"), ".hidden");
        assert_eq!(used.claim(".hidden"), ".hidden_1");
    }
}
