//! Profile metadata extraction
//!
//! Pulls a handful of attributes out of a found profile page: the document title,
//! OpenGraph tags, and whatever the platform's own metadata regexes capture.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::CheckerError;

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

static META_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property], meta[name]").unwrap());

/// OpenGraph / meta tag -> metadata field
const META_FIELDS: &[(&str, &str)] = &[
    ("og:title", "display_name"),
    ("og:description", "bio"),
    ("description", "bio"),
    ("og:image", "avatar"),
    ("profile:username", "username"),
];

/// Longest value kept per field
const MAX_VALUE_LEN: usize = 500;

/// Compiled extraction rules for one platform
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor {
    rules: Vec<(String, Regex)>,
}

impl MetadataExtractor {
    /// Compile a platform's `field -> regex` map; every regex needs one capture group
    pub fn new(platform: &str, rules: &BTreeMap<String, String>) -> Result<Self, CheckerError> {
        let rules = rules
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .map(|re| (field.clone(), re))
                    .map_err(|source| CheckerError::InvalidPattern {
                        platform: platform.to_string(),
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn extract(&self, body: &str) -> BTreeMap<String, String> {
        let mut metadata = extract_html_metadata(body);

        // Platform rules are more specific than generic tags
        for (field, re) in &self.rules {
            if let Some(value) = re.captures(body).and_then(|c| c.get(1)) {
                if let Some(value) = clean(value.as_str()) {
                    metadata.insert(field.clone(), value);
                }
            }
        }
        metadata
    }
}

/// Title and meta tags from an HTML document
pub fn extract_html_metadata(html: &str) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut metadata = BTreeMap::new();

    if let Some(title) = document
        .select(&TITLE_SELECTOR)
        .next()
        .and_then(|el| clean(&el.text().collect::<String>()))
    {
        metadata.insert("title".to_string(), title);
    }

    for element in document.select(&META_SELECTOR) {
        let value = element.value();
        let Some(name) = value.attr("property").or_else(|| value.attr("name")) else {
            continue;
        };
        let Some(field) = META_FIELDS
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(name))
            .map(|(_, field)| *field)
        else {
            continue;
        };
        if metadata.contains_key(field) {
            continue;
        }
        if let Some(content) = value.attr("content").and_then(clean) {
            metadata.insert(field.to_string(), content);
        }
    }

    metadata
}

fn clean(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_VALUE_LEN).collect())
}
