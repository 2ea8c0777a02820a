//! Reduction of raw recipe-page HTML to model-ready text.
//!
//! Text: unwanted regions are skipped while walking the best main-content
//! region, then whitespace is collapsed and noise sentences removed.
//! Image: metadata first (Open Graph, Twitter, JSON-LD), then site-specific
//! selectors, then a generic large-image heuristic. Image lookup never fails
//! the reduction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::sites::{site_config_for, SiteConfig, GENERIC_SITE};

/// Reduced text shorter than this cannot hold a recipe.
pub const MIN_CONTENT_CHARS: usize = 100;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{2009}\u{202f}]+").expect("Invalid whitespace regex"));

/// Sentences (bounded by `.`, `!`, `?` or a line break) mentioning page chrome.
static NOISE_SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[^.!?\n]*(?:cookie|polityk\w* prywatności|privacy policy|reklam\w*|advertisement|newsletter|zapisz się|subscribe|udostępnij|share on|facebook|instagram|pinterest|twitter|youtube|tiktok|podobne przepisy|related recipes|zobacz (?:też|także|również)|you may also like|komentarz\w*|comments?\b|wszelkie prawa zastrzeżone|all rights reserved|copyright)[^.!?\n]*[.!?]?",
    )
    .expect("Invalid noise regex")
});

static THUMBNAIL_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(thumb|icon|logo|avatar|sprite|placeholder|spacer|pixel|blank|badge|emoji|gravatar|[-_]\d{2,3}x\d{2,3}\.|[-_](small|mini|xs|sm|tiny)[-_.])",
    )
    .expect("Invalid thumbnail regex")
});

static HIGH_RES_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(large|full|original|hero|featured|main|big|[-_]xl[-_.]|[-_]\d{4}x\d{3,4}\.|1200|1600|1920|2048)")
        .expect("Invalid high-res regex")
});

#[derive(Debug, Error, PartialEq)]
pub enum ReduceError {
    #[error("Not enough recipe content on the page ({found} characters, at least {required} needed)")]
    InsufficientContent { found: usize, required: usize },
}

/// Output of [`reduce`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedContent {
    pub text: String,
    pub image_url: Option<String>,
    pub title: Option<String>,
}

/// Reduce `html` fetched from `source_url` to clean text, a title and the main image.
pub fn reduce(html: &str, source_url: &str) -> Result<ReducedContent, ReduceError> {
    let base = Url::parse(source_url).ok();
    let site = base
        .as_ref()
        .and_then(|u| u.host_str())
        .map(site_config_for)
        .unwrap_or(&GENERIC_SITE);

    let document = Html::parse_document(html);

    let text = extract_text(&document, site);
    let found = text.chars().count();
    if found < MIN_CONTENT_CHARS {
        warn!(
            "Reduced content for {} too short ({} chars)",
            source_url, found
        );
        return Err(ReduceError::InsufficientContent {
            found,
            required: MIN_CONTENT_CHARS,
        });
    }

    let title = extract_title(&document);
    let image_url = base
        .as_ref()
        .and_then(|base| extract_main_image(&document, base, site));

    debug!(
        "Reduced {} bytes of HTML to {} chars (title: {:?}, image: {:?})",
        html.len(),
        found,
        title,
        image_url
    );

    Ok(ReducedContent {
        text,
        image_url,
        title,
    })
}

/// Resolve a possibly relative or protocol-relative URL against the page URL.
pub fn resolve_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let resolved = base.join(raw).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

// ============================================================================
// Text
// ============================================================================

fn compile_selectors(sources: &[&str]) -> Vec<Selector> {
    sources
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!("Skipping invalid selector '{}': {:?}", s, e);
                None
            }
        })
        .collect()
}

fn extract_text(document: &Html, site: &SiteConfig) -> String {
    let mut removals = compile_selectors(GENERIC_SITE.remove_selectors);
    if !std::ptr::eq(site, &GENERIC_SITE) {
        removals.extend(compile_selectors(site.remove_selectors));
    }

    let mut candidates = compile_selectors(site.content_selectors);
    if !std::ptr::eq(site, &GENERIC_SITE) {
        candidates.extend(compile_selectors(GENERIC_SITE.content_selectors));
    }

    for selector in &candidates {
        for region in document.select(selector) {
            if is_removed(region, &removals) {
                continue;
            }
            let text = clean_text(&region_text(region, &removals));
            if text.chars().count() >= MIN_CONTENT_CHARS {
                return text;
            }
        }
    }

    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    clean_text(&region_text(root, &removals))
}

/// True when the region or any of its ancestors is stripped chrome.
fn is_removed(region: ElementRef<'_>, removals: &[Selector]) -> bool {
    std::iter::once(region)
        .chain(region.ancestors().filter_map(ElementRef::wrap))
        .any(|el| removals.iter().any(|s| s.matches(&el)))
}

fn region_text(region: ElementRef<'_>, removals: &[Selector]) -> String {
    let mut out = String::new();
    collect_text(region, removals, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, removals: &[Selector], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if removals.iter().any(|s| s.matches(&child_el)) {
                    continue;
                }

                let name = el.name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }

                let block = is_block(name);
                if block {
                    out.push('\n');
                }
                collect_text(child_el, removals, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "li"
            | "ul"
            | "ol"
            | "dl"
            | "dt"
            | "dd"
            | "tr"
            | "td"
            | "th"
            | "table"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "blockquote"
            | "pre"
            | "figure"
            | "figcaption"
    )
}

/// Decode stray entities, collapse whitespace and drop noise sentences.
fn clean_text(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let collapsed = collapse_lines(&decoded);
    let denoised = NOISE_SENTENCE.replace_all(&collapsed, "");
    collapse_lines(&denoised)
}

fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(|line| HORIZONTAL_WS.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The parser decodes entities once; this handles double-encoded leftovers.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&ndash;", "–")
        .replace("&mdash;", "—")
        .replace("&amp;", "&")
}

fn extract_title(document: &Html) -> Option<String> {
    meta_content(document, "meta[property='og:title']")
        .or_else(|| first_text(document, "title"))
        .or_else(|| first_text(document, "h1"))
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|el| collapse_lines(&el.text().collect::<String>()).replace('\n', " "))
        .find(|t| !t.is_empty())
}

// ============================================================================
// Image
// ============================================================================

/// Best guess at the recipe's main photo, as an absolute URL.
pub fn extract_main_image(document: &Html, base: &Url, site: &SiteConfig) -> Option<String> {
    let resolve = |raw: String| resolve_url(&raw, base);

    meta_content(document, "meta[property='og:image']")
        .and_then(resolve)
        .or_else(|| {
            meta_content(
                document,
                "meta[name='twitter:image'], meta[property='twitter:image'], meta[name='twitter:image:src']",
            )
            .and_then(resolve)
        })
        .or_else(|| jsonld_image(document).and_then(resolve))
        .or_else(|| site_image(document, site).and_then(resolve))
        .or_else(|| generic_image(document, base))
        .or_else(|| meta_content(document, "meta[property^='og:image']").and_then(resolve))
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn jsonld_image(document: &Html) -> Option<String> {
    let selector = Selector::parse("script[type='application/ld+json']").ok()?;
    let blocks: Vec<Value> = document
        .select(&selector)
        .filter_map(|el| serde_json::from_str(&el.text().collect::<String>()).ok())
        .collect();

    blocks
        .iter()
        .find_map(|json| find_recipe_node(json).and_then(|recipe| image_value(recipe.get("image")?)))
        .or_else(|| blocks.iter().find_map(find_any_image))
}

/// Matches `Recipe`, `schema:Recipe` and `http(s)://schema.org/Recipe`.
fn is_recipe_type(value: Option<&Value>) -> bool {
    fn names_recipe(t: &str) -> bool {
        t == "Recipe" || t.ends_with(":Recipe") || t.ends_with("/Recipe")
    }

    match value {
        Some(Value::String(t)) => names_recipe(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(names_recipe),
        _ => false,
    }
}

fn find_recipe_node(json: &Value) -> Option<&Value> {
    match json {
        Value::Object(obj) => {
            if is_recipe_type(obj.get("@type")) {
                return Some(json);
            }
            obj.get("@graph").and_then(find_recipe_node)
        }
        Value::Array(items) => items.iter().find_map(find_recipe_node),
        _ => None,
    }
}

fn find_any_image(json: &Value) -> Option<String> {
    match json {
        Value::Object(obj) => obj
            .get("image")
            .and_then(image_value)
            .or_else(|| obj.get("@graph").and_then(find_any_image)),
        Value::Array(items) => items.iter().find_map(find_any_image),
        _ => None,
    }
}

/// JSON-LD `image` may be a URL, a list, or an `ImageObject`.
fn image_value(value: &Value) -> Option<String> {
    match value {
        Value::String(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
        Value::Array(items) => items.iter().find_map(image_value),
        Value::Object(obj) => obj
            .get("url")
            .or_else(|| obj.get("contentUrl"))
            .and_then(image_value),
        _ => None,
    }
}

fn site_image(document: &Html, site: &SiteConfig) -> Option<String> {
    let img = Selector::parse("img").ok()?;
    for selector in compile_selectors(site.image_selectors) {
        for el in document.select(&selector) {
            let candidate = if el.value().name() == "img" {
                Some(el)
            } else {
                el.select(&img).next()
            };
            if let Some((src, _)) = candidate.and_then(image_source) {
                return Some(src);
            }
        }
    }
    None
}

/// Preferred source of an `<img>`: widest `srcset` entry, then lazy-load
/// attributes, then `src`. The flag is true for the first two.
fn image_source(img: ElementRef<'_>) -> Option<(String, bool)> {
    let attrs = img.value();

    let from_srcset = ["data-srcset", "srcset"]
        .iter()
        .filter_map(|a| attrs.attr(a))
        .find_map(widest_srcset_entry);
    if let Some(src) = from_srcset {
        return Some((src, true));
    }

    let lazy = ["data-src", "data-lazy-src", "data-original"]
        .iter()
        .filter_map(|a| attrs.attr(a))
        .map(str::trim)
        .find(|s| !s.is_empty() && !s.starts_with("data:"));
    if let Some(src) = lazy {
        return Some((src.to_string(), true));
    }

    attrs
        .attr("src")
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with("data:"))
        .map(|s| (s.to_string(), false))
}

fn widest_srcset_entry(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split_whitespace();
            let url = parts.next()?;
            let weight = parts
                .next()
                .and_then(|d| {
                    if let Some(w) = d.strip_suffix('w') {
                        w.parse::<f64>().ok()
                    } else {
                        d.strip_suffix('x').and_then(|x| x.parse::<f64>().ok()).map(|x| x * 1000.0)
                    }
                })
                .unwrap_or(0.0);
            Some((url, weight))
        })
        .filter(|(url, _)| !url.starts_with("data:"))
        .fold(None::<(&str, f64)>, |best, (url, weight)| match best {
            Some((_, best_weight)) if best_weight >= weight => best,
            _ => Some((url, weight)),
        })
        .map(|(url, _)| url.to_string())
}

fn generic_image(document: &Html, base: &Url) -> Option<String> {
    let selector = Selector::parse("img").ok()?;
    let mut best: Option<(i32, String)> = None;

    for img in document.select(&selector) {
        let Some((src, hi_res_attr)) = image_source(img) else {
            continue;
        };
        let lower = src.to_lowercase();
        if lower.ends_with(".svg") || lower.ends_with(".gif") || THUMBNAIL_HINT.is_match(&src) {
            continue;
        }

        let width = img
            .value()
            .attr("width")
            .and_then(|w| w.trim_end_matches("px").parse::<u32>().ok());
        if matches!(width, Some(w) if w < 200) {
            continue;
        }

        let mut score = 0;
        if HIGH_RES_HINT.is_match(&src) {
            score += 3;
        }
        if hi_res_attr {
            score += 2;
        }
        if matches!(width, Some(w) if w >= 400) {
            score += 2;
        }

        let Some(resolved) = resolve_url(&src, base) else {
            continue;
        };
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, resolved));
        }
    }

    best.map(|(_, url)| url)
}
