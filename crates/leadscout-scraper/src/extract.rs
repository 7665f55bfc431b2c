//! Listings-page scraping for one (town, industry) pair.
//!
//! The listings target renders result cards whose markup shifts over time,
//! so every field is extracted through a prioritized strategy list rather
//! than a single selector that hard-fails on mismatch. A missing optional
//! field degrades the record; only a page with no recognizable results
//! structure raises.

use crate::error::{Result, ScrapeError};
use leadscout_browser::{NavigationManager, PageNavigator};
use leadscout_core::BusinessRecord;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// CSS selectors for the listings page, overridable from config so a
/// markup change on the target does not require a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// One business result card.
    pub result_card: String,
    /// Business name within a card.
    pub name: String,
    /// Phone anchor or text within a card.
    pub phone: String,
    /// Street address within a card.
    pub address: String,
    /// Element present when the search legitimately matched nothing.
    pub no_results: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            result_card: "div.result-card".to_string(),
            name: ".business-name".to_string(),
            phone: "a[href^='tel:'], .phone".to_string(),
            address: ".address".to_string(),
            no_results: ".no-results".to_string(),
        }
    }
}

/// Build the listings search URL for one work unit.
///
/// The query is a single free-text term, `"{industry} in {town}"`, which is
/// what the target's own search box submits.
pub fn build_search_url(base: &str, town: &str, industry: &str) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| ScrapeError::InvalidJob(format!(
        "listings base URL {base:?} is not a valid URL: {e}"
    )))?;
    url.query_pairs_mut()
        .append_pair("q", &format!("{industry} in {town}"));
    Ok(url.into())
}

/// Detect an anti-bot interstitial in the rendered page.
///
/// The target serves a reCAPTCHA interstitial instead of results once a
/// session looks automated; its markup always carries one of these
/// markers. Matching stays at the markup level (widget class, script
/// URL, interstitial phrase) so a listing whose text merely mentions a
/// captcha is not mistaken for a challenge.
#[must_use]
pub fn detect_bot_challenge(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("g-recaptcha")
        || lower.contains("recaptcha/api.js")
        || lower.contains("google.com/recaptcha")
        || lower.contains("unusual traffic from your computer network")
}

/// Scrapes business records from the listings target.
pub struct IndustryScraper {
    base_url: String,
    selectors: ListingSelectors,
}

impl IndustryScraper {
    /// Create a scraper against `base_url` with the given selectors.
    #[must_use]
    pub fn new(base_url: String, selectors: ListingSelectors) -> Self {
        Self {
            base_url,
            selectors,
        }
    }

    /// Load and harvest the listings page for one (town, industry) pair.
    ///
    /// Navigation failures (all wait strategies exhausted) and bot
    /// challenges propagate so the whole work unit enters the retry queue;
    /// individual malformed cards are skipped, not fatal.
    pub async fn scrape<N: PageNavigator + ?Sized>(
        &self,
        navigator: &N,
        nav_manager: &mut NavigationManager,
        town: &str,
        industry: &str,
    ) -> Result<Vec<BusinessRecord>> {
        let url = build_search_url(&self.base_url, town, industry)?;

        let outcome = nav_manager.navigate_with_retry(navigator, &url).await?;
        tracing::debug!(
            town,
            industry,
            strategy = %outcome.strategy,
            attempt = outcome.attempt,
            "Listings page loaded"
        );

        let html = navigator.content().await?;
        let records = self.parse(&html, &url, town, industry)?;
        tracing::info!(town, industry, count = records.len(), "Cards extracted");
        Ok(records)
    }

    /// Extract business records from rendered listings HTML.
    ///
    /// Pure with respect to the network, so tests feed it static HTML.
    pub fn parse(
        &self,
        html: &str,
        url: &str,
        town: &str,
        industry: &str,
    ) -> Result<Vec<BusinessRecord>> {
        if detect_bot_challenge(html) {
            return Err(ScrapeError::BotChallenge(format!(
                "challenge interstitial served for {url}"
            )));
        }

        let document = Html::parse_document(html);

        let card_selector =
            Selector::parse(&self.selectors.result_card).map_err(|e| ScrapeError::Extraction {
                url: url.to_string(),
                reason: format!("invalid result-card selector: {e}"),
            })?;

        let mut records = Vec::new();
        for card in document.select(&card_selector) {
            if let Some(record) = self.parse_card(&card, town, industry) {
                records.push(record);
            }
        }

        if records.is_empty() {
            // Distinguish "searched, found nothing" from "markup changed".
            if let Ok(no_results) = Selector::parse(&self.selectors.no_results) {
                if document.select(&no_results).next().is_some() {
                    return Ok(vec![]);
                }
            }
            return Err(ScrapeError::Extraction {
                url: url.to_string(),
                reason: "no result cards and no no-results marker; selectors likely outdated"
                    .to_string(),
            });
        }

        Ok(records)
    }

    /// One card. A card without a name is navigation chrome, not a
    /// business; everything else is optional.
    fn parse_card(&self, card: &ElementRef, town: &str, industry: &str) -> Option<BusinessRecord> {
        let name = extract_text(card, &self.selectors.name)?;

        let phone = self.extract_phone(card);
        let address = extract_text(card, &self.selectors.address);
        let map_url = extract_map_link(card);

        Some(BusinessRecord {
            name,
            phone,
            address,
            map_url,
            town: town.to_string(),
            industry: industry.to_string(),
            provider: None,
        })
    }

    fn extract_phone(&self, card: &ElementRef) -> Option<String> {
        // tel: anchors carry the cleanest value; fall back to visible text.
        let selector = Selector::parse(&self.selectors.phone).ok()?;
        let element = card.select(&selector).next()?;
        if let Some(href) = element.value().attr("href") {
            if let Some(number) = href.strip_prefix("tel:") {
                let number = number.trim();
                if !number.is_empty() {
                    return Some(number.to_string());
                }
            }
        }
        let text = element.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Map-link fallback ladder: first anchor whose href matches a map URL
/// pattern, then the card's first anchor if it plausibly points at a map,
/// then absent.
fn extract_map_link(card: &ElementRef) -> Option<String> {
    let anchors = Selector::parse("a[href]").ok()?;

    let mut first_href: Option<&str> = None;
    for anchor in card.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if first_href.is_none() {
            first_href = Some(href);
        }
        if is_map_url(href) {
            return Some(href.to_string());
        }
    }

    first_href
        .filter(|href| href.to_lowercase().contains("map"))
        .map(str::to_string)
}

fn is_map_url(href: &str) -> bool {
    let lower = href.to_lowercase();
    lower.contains("maps.google")
        || lower.contains("/maps/place")
        || lower.contains("google.com/maps")
        || lower.starts_with("geo:")
}

fn extract_text(card: &ElementRef, selector: &str) -> Option<String> {
    Selector::parse(selector)
        .ok()
        .and_then(|s| card.select(&s).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> IndustryScraper {
        IndustryScraper::new(
            "https://maps.example.com/search".to_string(),
            ListingSelectors::default(),
        )
    }

    const THREE_CARDS: &str = r#"
        <div class="results">
            <div class="result-card">
                <div class="business-name">Alpha Pharmacy</div>
                <a href="tel:+1 (555) 010-0001" class="phone">Call</a>
                <div class="address">1 Main St, Alpha</div>
                <a href="https://maps.google.com/maps/place/alpha-pharmacy">Map</a>
            </div>
            <div class="result-card">
                <div class="business-name">Beta Drugs</div>
                <div class="phone">555-010-0002</div>
                <div class="address">2 Side St, Alpha</div>
                <a href="/maps/place/beta-drugs">Directions</a>
            </div>
            <div class="result-card">
                <div class="business-name">Gamma Apothecary</div>
                <div class="address">3 Back St, Alpha</div>
            </div>
        </div>
    "#;

    #[test]
    fn test_build_search_url_encodes_query() {
        let url = build_search_url("https://maps.example.com/search", "Spring Field", "Pharmacy")
            .expect("valid URL");
        assert_eq!(
            url,
            "https://maps.example.com/search?q=Pharmacy+in+Spring+Field"
        );
    }

    #[test]
    fn test_build_search_url_rejects_garbage_base() {
        let err = build_search_url("not a url", "Alpha", "Pharmacy").expect_err("must fail");
        assert!(matches!(err, ScrapeError::InvalidJob(_)));
    }

    #[test]
    fn test_parse_three_cards_two_phones() {
        let records = scraper()
            .parse(THREE_CARDS, "https://x", "Alpha", "Pharmacy")
            .expect("parse");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name, "Alpha Pharmacy");
        assert_eq!(records[0].phone.as_deref(), Some("+1 (555) 010-0001"));
        assert_eq!(records[1].phone.as_deref(), Some("555-010-0002"));
        assert_eq!(records[2].phone, None);
        assert!(records.iter().all(|r| r.town == "Alpha"));
        assert!(records.iter().all(|r| r.provider.is_none()));
    }

    #[test]
    fn test_map_link_prefers_map_pattern_anchor() {
        let html = r#"
            <div class="result-card">
                <div class="business-name">Delta Shop</div>
                <a href="/reviews/delta">Reviews</a>
                <a href="https://maps.google.com/maps/place/delta">Map</a>
            </div>
        "#;
        let records = scraper()
            .parse(html, "https://x", "Alpha", "Shop")
            .expect("parse");
        assert_eq!(
            records[0].map_url.as_deref(),
            Some("https://maps.google.com/maps/place/delta")
        );
    }

    #[test]
    fn test_map_link_falls_back_to_plausible_first_anchor() {
        let html = r#"
            <div class="result-card">
                <div class="business-name">Epsilon Shop</div>
                <a href="/mapview/epsilon">View</a>
            </div>
        "#;
        let records = scraper()
            .parse(html, "https://x", "Alpha", "Shop")
            .expect("parse");
        assert_eq!(records[0].map_url.as_deref(), Some("/mapview/epsilon"));
    }

    #[test]
    fn test_map_link_absent_when_no_plausible_anchor() {
        let html = r#"
            <div class="result-card">
                <div class="business-name">Zeta Shop</div>
                <a href="/reviews/zeta">Reviews</a>
            </div>
        "#;
        let records = scraper()
            .parse(html, "https://x", "Alpha", "Shop")
            .expect("parse");
        assert_eq!(records[0].map_url, None);
    }

    #[test]
    fn test_nameless_card_skipped_not_fatal() {
        let html = r#"
            <div class="result-card"><div class="ad">Sponsored</div></div>
            <div class="result-card"><div class="business-name">Eta Shop</div></div>
        "#;
        let records = scraper()
            .parse(html, "https://x", "Alpha", "Shop")
            .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Eta Shop");
    }

    #[test]
    fn test_no_results_marker_yields_empty_set() {
        let html = r#"<div class="no-results">Nothing matched your search.</div>"#;
        let records = scraper()
            .parse(html, "https://x", "Nowhere", "Pharmacy")
            .expect("parse");
        assert!(records.is_empty());
    }

    #[test]
    fn test_unrecognized_markup_is_extraction_error() {
        let html = "<div class='totally-new-layout'></div>";
        let err = scraper()
            .parse(html, "https://x", "Alpha", "Pharmacy")
            .expect_err("must fail");
        assert!(matches!(err, ScrapeError::Extraction { .. }));
    }

    #[test]
    fn test_bot_challenge_detected() {
        let html = r#"<div class="g-recaptcha" data-sitekey="k"></div>"#;
        let err = scraper()
            .parse(html, "https://x", "Alpha", "Pharmacy")
            .expect_err("must fail");
        assert!(matches!(err, ScrapeError::BotChallenge(_)));
        assert!(detect_bot_challenge(html));
        assert!(detect_bot_challenge(
            r#"<script src="https://www.google.com/recaptcha/api.js"></script>"#
        ));
        assert!(detect_bot_challenge(
            "<p>Our systems have detected unusual traffic from your computer network.</p>"
        ));
        assert!(!detect_bot_challenge("<div class='result-card'></div>"));
    }

    #[test]
    fn test_listing_text_mentioning_captcha_is_not_a_challenge() {
        let html = r#"
            <div class="result-card">
                <div class="business-name">Captcha Coffee Roasters</div>
                <div class="address">7 Bean St</div>
                <p>Read our recaptcha-free checkout story.</p>
            </div>
        "#;
        let records = scraper()
            .parse(html, "https://x", "Alpha", "Cafe")
            .expect("legitimate listing parses");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Captcha Coffee Roasters");
    }
}
