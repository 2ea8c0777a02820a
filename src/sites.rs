//! Supported recipe sites and their scraping hints.
//!
//! URL extraction is limited to the domains listed here. Each domain may carry
//! its own selectors; anything without an entry uses [`GENERIC_SITE`].

use thiserror::Error;
use url::Url;

/// Domains accepted for URL extraction, compared without a leading `www.`.
pub const SUPPORTED_DOMAINS: &[&str] = &[
    "aniagotuje.pl",
    "kwestiasmaku.com",
    "mojewypieki.com",
    "przepisy.pl",
    "kuchnialidla.pl",
    "poprostupycha.com.pl",
    "smaker.pl",
    "ugotuj.to",
    "jadlonomia.com",
    "kotlet.tv",
];

#[derive(Debug, Error, PartialEq)]
pub enum UrlRejection {
    #[error("Invalid URL: {0}")]
    Invalid(String),

    #[error("Unsupported domain: {0}")]
    UnsupportedDomain(String),
}

/// Parse `raw` and check it against the allow-list. No network access.
pub fn parse_supported_url(raw: &str) -> Result<Url, UrlRejection> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlRejection::Invalid(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlRejection::Invalid(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| UrlRejection::Invalid("missing host".to_string()))?;

    if !is_supported_domain(host) {
        return Err(UrlRejection::UnsupportedDomain(host.to_string()));
    }

    Ok(url)
}

pub fn is_supported_domain(host: &str) -> bool {
    let host = normalize_host(host);
    SUPPORTED_DOMAINS.contains(&host.as_str())
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// CSS selectors steering the content reducer for one site.
#[derive(Debug)]
pub struct SiteConfig {
    /// Candidate main-content regions, most specific first.
    pub content_selectors: &'static [&'static str],
    /// Regions dropped before text is collected, on top of the generic ones.
    pub remove_selectors: &'static [&'static str],
    /// Elements known to hold the recipe's main photo.
    pub image_selectors: &'static [&'static str],
}

pub static GENERIC_SITE: SiteConfig = SiteConfig {
    content_selectors: &[
        "[itemtype*='schema.org/Recipe']",
        ".wprm-recipe-container",
        ".tasty-recipes",
        ".recipe",
        "article",
        "main",
        "[role='main']",
        "#content",
        ".entry-content",
        ".post-content",
        ".content",
    ],
    remove_selectors: &[
        "script",
        "style",
        "noscript",
        "template",
        "iframe",
        "svg",
        "form",
        "button",
        "nav",
        "header",
        "footer",
        "aside",
        "[role='navigation']",
        "[role='banner']",
        "[role='contentinfo']",
        "[class*='advert']",
        "[id*='advert']",
        "[class*='adsbygoogle']",
        "[class*='banner']",
        "[class*='cookie']",
        "[id*='cookie']",
        "[class*='social']",
        "[class*='share']",
        "[class*='comment']",
        "[id*='comment']",
        "[class*='newsletter']",
        "[class*='related']",
        "[class*='sidebar']",
        "[class*='breadcrumb']",
        "[class*='popup']",
        "[class*='modal']",
    ],
    image_selectors: &[],
};

static ANIAGOTUJE: SiteConfig = SiteConfig {
    content_selectors: &["article.article", ".article-content", ".recipe-content"],
    remove_selectors: &[".article-tags", ".author-box", ".rating-box"],
    image_selectors: &[".article-main-img img", ".recipe-img img", "article img.photo"],
};

static KWESTIASMAKU: SiteConfig = SiteConfig {
    content_selectors: &[".node-przepis", "#main-content .content"],
    remove_selectors: &[".field-name-field-podobne", ".przepisy-podobne", ".fb-like"],
    image_selectors: &[".field-name-field-zdjecie img", ".view-zdjecie img"],
};

static MOJEWYPIEKI: SiteConfig = SiteConfig {
    content_selectors: &[".article__content", ".article-content", ".post"],
    remove_selectors: &[".article__tags", ".author"],
    image_selectors: &[".article__image img", ".article-image img"],
};

static PRZEPISY: SiteConfig = SiteConfig {
    content_selectors: &[".recipe-container", ".recipe-details", ".recipe-content"],
    remove_selectors: &[".recipe-rating", ".recipe-user", ".product-box"],
    image_selectors: &[".recipe-image img", ".recipe-img img", ".main-photo img"],
};

static KUCHNIALIDLA: SiteConfig = SiteConfig {
    content_selectors: &[".recipe-detail", "#recipe", ".recipe-page"],
    remove_selectors: &[".products-carousel", ".recipe-voting"],
    image_selectors: &[".recipe-header img", ".recipe-photo img"],
};

/// Configuration for `host`, falling back to [`GENERIC_SITE`].
pub fn site_config_for(host: &str) -> &'static SiteConfig {
    match normalize_host(host).as_str() {
        "aniagotuje.pl" => &ANIAGOTUJE,
        "kwestiasmaku.com" => &KWESTIASMAKU,
        "mojewypieki.com" => &MOJEWYPIEKI,
        "przepisy.pl" => &PRZEPISY,
        "kuchnialidla.pl" => &KUCHNIALIDLA,
        _ => &GENERIC_SITE,
    }
}
