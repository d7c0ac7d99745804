//! Main-content extraction for fetched web pages.
//!
//! Containers are tried from most to least specific: `<article>`, `<main>`, `div.content`,
//! `div.article`, `div#content`. The first match wins and its text is returned with tags
//! removed, entities decoded and whitespace collapsed.

use regex::{Captures, Regex};

use crate::tools::FetchError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Container {
    Tag(&'static str),
    DivClass(&'static str),
    DivId(&'static str),
}

const CONTAINERS: [Container; 5] = [
    Container::Tag("article"),
    Container::Tag("main"),
    Container::DivClass("content"),
    Container::DivClass("article"),
    Container::DivId("content"),
];

#[derive(Clone, Debug)]
pub struct ContentExtractor {
    noise: Regex,
    tag: Regex,
    attribute: Regex,
    entity: Regex,
}

impl ContentExtractor {
    pub fn new() -> Result<Self, FetchError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|error| FetchError::Extractor(error.to_string()))
        };

        Ok(Self {
            noise: compile(
                r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>",
            )?,
            tag: compile(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b([^>]*)>")?,
            attribute: compile(
                r#"(?i)\b(class|id)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
            )?,
            entity: compile(r"&(#[xX][0-9A-Fa-f]+|#[0-9]+|[A-Za-z]+);")?,
        })
    }

    /// Text of the most specific content container, or `None` when the page has none.
    pub fn extract_main_content(&self, html: &str) -> Option<String> {
        let cleaned = self.noise.replace_all(html, " ");

        CONTAINERS.iter().find_map(|container| {
            let inner = self.container_inner(&cleaned, *container)?;
            let text = self.visible_text(inner);
            (!text.is_empty()).then_some(text)
        })
    }

    fn container_inner<'h>(&self, html: &'h str, container: Container) -> Option<&'h str> {
        let wanted = match container {
            Container::Tag(name) => name,
            Container::DivClass(_) | Container::DivId(_) => "div",
        };

        let mut tokens = self.tag.captures_iter(html);
        let open_end = tokens.by_ref().find_map(|token| {
            let is_open = token.get(1).map(|slash| slash.as_str().is_empty()).unwrap_or(true);
            let name = token.get(2)?.as_str();
            if !is_open || !name.eq_ignore_ascii_case(wanted) {
                return None;
            }
            let attributes = token.get(3).map(|attrs| attrs.as_str()).unwrap_or_default();
            self.matches(container, attributes).then(|| token.get(0).map(|whole| whole.end()))?
        })?;

        let mut depth = 1usize;
        for token in tokens {
            let Some(name) = token.get(2) else { continue };
            if !name.as_str().eq_ignore_ascii_case(wanted) {
                continue;
            }
            let Some(whole) = token.get(0) else { continue };
            let closing = token.get(1).map(|slash| !slash.as_str().is_empty()).unwrap_or(false);
            if closing {
                depth -= 1;
                if depth == 0 {
                    return Some(&html[open_end..whole.start()]);
                }
            } else if !whole.as_str().ends_with("/>") {
                depth += 1;
            }
        }

        Some(&html[open_end..])
    }

    fn matches(&self, container: Container, attributes: &str) -> bool {
        let (key, wanted) = match container {
            Container::Tag(_) => return true,
            Container::DivClass(class) => ("class", class),
            Container::DivId(id) => ("id", id),
        };

        self.attribute.captures_iter(attributes).any(|attribute| {
            let name_matches = attribute
                .get(1)
                .map(|name| name.as_str().eq_ignore_ascii_case(key))
                .unwrap_or(false);
            let value = attribute
                .get(2)
                .or_else(|| attribute.get(3))
                .or_else(|| attribute.get(4))
                .map(|value| value.as_str())
                .unwrap_or_default();
            name_matches
                && if key == "class" {
                    value.split_whitespace().any(|class| class == wanted)
                } else {
                    value.trim() == wanted
                }
        })
    }

    fn visible_text(&self, fragment: &str) -> String {
        let without_tags = self.tag.replace_all(fragment, " ");
        let decoded = self.entity.replace_all(&without_tags, |entity: &Captures<'_>| {
            let name = entity.get(1).map(|name| name.as_str()).unwrap_or_default();
            decode_entity(name).unwrap_or_else(|| {
                entity.get(0).map(|whole| whole.as_str().to_string()).unwrap_or_default()
            })
        });
        decoded.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32).map(String::from);
    }
    if let Some(decimal) = name.strip_prefix('#') {
        return decimal.parse::<u32>().ok().and_then(char::from_u32).map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        _ => return None,
    };
    Some(decoded.to_string())
}

#[cfg(test)]
mod tests {
    use super::ContentExtractor;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new().expect("patterns compile")
    }

    #[test]
    fn article_wins_over_main() {
        let html = r#"<html><body>
            <main><p>Main body</p></main>
            <article><h1>Headline</h1><p>Story &amp; more.</p></article>
        </body></html>"#;

        assert_eq!(
            extractor().extract_main_content(html).as_deref(),
            Some("Headline Story & more.")
        );
    }

    #[test]
    fn nested_divs_are_balanced() {
        let html = r#"<div class="nav">menu</div>
            <div class="page content wide"><div>Inner</div> tail</div>
            <div>footer</div>"#;

        assert_eq!(extractor().extract_main_content(html).as_deref(), Some("Inner tail"));
    }

    #[test]
    fn class_match_is_exact_token() {
        let html = r#"<div class="main-content">no</div><div id="content">yes</div>"#;

        assert_eq!(extractor().extract_main_content(html).as_deref(), Some("yes"));
    }

    #[test]
    fn scripts_styles_and_comments_are_dropped() {
        let html = r#"<main><script>var x = 1;</script><style>p{}</style><!-- hidden -->
            <p>Population&#32;2024</p></main>"#;

        assert_eq!(extractor().extract_main_content(html).as_deref(), Some("Population 2024"));
    }

    #[test]
    fn pages_without_a_container_yield_none() {
        assert_eq!(extractor().extract_main_content("<body><p>plain</p></body>"), None);
        assert_eq!(extractor().extract_main_content("<article>   </article>"), None);
    }
}
