//! Carrier-provider lookup against the lookup target.
//!
//! Pure fetch-and-parse: cache reads and write-backs stay with the
//! orchestrator, so this module never touches the database.

use crate::error::{Result, ScrapeError};
use crate::extract::detect_bot_challenge;
use leadscout_browser::{NavigationManager, PageNavigator};
use leadscout_db::{normalize_phone, ProviderCacheEntry};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

/// CSS selectors for the lookup result page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupSelectors {
    /// Element holding the carrier name.
    pub provider: String,
    /// Optional element holding a confidence figure.
    pub confidence: String,
}

impl Default for LookupSelectors {
    fn default() -> Self {
        Self {
            provider: ".carrier-name".to_string(),
            confidence: ".confidence".to_string(),
        }
    }
}

/// Build the lookup URL for one normalized phone number.
pub fn build_lookup_url(base: &str, normalized_phone: &str) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| ScrapeError::InvalidJob(format!(
        "lookup base URL {base:?} is not a valid URL: {e}"
    )))?;
    url.query_pairs_mut().append_pair("number", normalized_phone);
    Ok(url.into())
}

/// Resolves phone numbers to carriers via the lookup target.
pub struct ProviderLookup {
    base_url: String,
    selectors: LookupSelectors,
}

impl ProviderLookup {
    /// Create a lookup client against `base_url`.
    #[must_use]
    pub fn new(base_url: String, selectors: LookupSelectors) -> Self {
        Self {
            base_url,
            selectors,
        }
    }

    /// Resolve one phone number to a cache entry ready for write-back.
    ///
    /// An unreachable lookup target surfaces as [`ScrapeError::Lookup`],
    /// which is retryable like any navigation failure.
    pub async fn lookup<N: PageNavigator + ?Sized>(
        &self,
        navigator: &N,
        nav_manager: &mut NavigationManager,
        phone: &str,
    ) -> Result<ProviderCacheEntry> {
        let normalized = normalize_phone(phone).ok_or_else(|| ScrapeError::Lookup {
            phone: phone.to_string(),
            reason: "not a usable phone number after normalization".to_string(),
        })?;

        let url = build_lookup_url(&self.base_url, &normalized)?;
        nav_manager
            .navigate_with_retry(navigator, &url)
            .await
            .map_err(|e| ScrapeError::Lookup {
                phone: normalized.clone(),
                reason: format!("lookup target unreachable: {e}"),
            })?;

        let html = navigator.content().await?;
        let (provider, confidence) = self.parse(&html, &normalized)?;
        tracing::debug!(phone = %normalized, provider = %provider, confidence, "Provider resolved");
        Ok(ProviderCacheEntry::now(normalized, provider, confidence))
    }

    /// Extract `(provider, confidence)` from a rendered lookup page.
    pub fn parse(&self, html: &str, phone: &str) -> Result<(String, f64)> {
        if detect_bot_challenge(html) {
            return Err(ScrapeError::BotChallenge(format!(
                "challenge interstitial served during lookup of {phone}"
            )));
        }

        let document = Html::parse_document(html);

        let provider_selector =
            Selector::parse(&self.selectors.provider).map_err(|e| ScrapeError::Lookup {
                phone: phone.to_string(),
                reason: format!("invalid provider selector: {e}"),
            })?;

        let provider = document
            .select(&provider_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ScrapeError::Lookup {
                phone: phone.to_string(),
                reason: "no carrier name on result page".to_string(),
            })?;

        let confidence = Selector::parse(&self.selectors.confidence)
            .ok()
            .and_then(|s| document.select(&s).next())
            .map(|el| el.text().collect::<String>())
            .and_then(|text| parse_confidence(&text))
            .unwrap_or(1.0);

        Ok((provider, confidence))
    }
}

/// Accepts "97%", "97", or "0.97"; anything unparseable means full trust.
fn parse_confidence(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('%').trim();
    let value: f64 = trimmed.parse().ok()?;
    let normalized = if value > 1.0 { value / 100.0 } else { value };
    (0.0..=1.0).contains(&normalized).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> ProviderLookup {
        ProviderLookup::new(
            "https://lookup.example.com/carrier".to_string(),
            LookupSelectors::default(),
        )
    }

    #[test]
    fn test_build_lookup_url() {
        let url = build_lookup_url("https://lookup.example.com/carrier", "5550100001")
            .expect("valid URL");
        assert_eq!(url, "https://lookup.example.com/carrier?number=5550100001");
    }

    #[test]
    fn test_parse_provider_and_confidence() {
        let html = r#"
            <div class="result">
                <span class="carrier-name">Verizon Wireless</span>
                <span class="confidence">97%</span>
            </div>
        "#;
        let (provider, confidence) = lookup().parse(html, "5550100001").expect("parse");
        assert_eq!(provider, "Verizon Wireless");
        assert!((confidence - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_without_confidence_defaults_to_full() {
        let html = r#"<span class="carrier-name">T-Mobile</span>"#;
        let (provider, confidence) = lookup().parse(html, "5550100001").expect("parse");
        assert_eq!(provider, "T-Mobile");
        assert!((confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_missing_carrier_is_lookup_error() {
        let err = lookup()
            .parse("<div>temporary error</div>", "5550100001")
            .expect_err("must fail");
        assert!(matches!(err, ScrapeError::Lookup { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_challenge_page() {
        let html = r#"<div class="g-recaptcha"></div>"#;
        let err = lookup().parse(html, "5550100001").expect_err("must fail");
        assert!(matches!(err, ScrapeError::BotChallenge(_)));
    }

    #[test]
    fn test_confidence_variants() {
        assert_eq!(parse_confidence("97%"), Some(0.97));
        assert_eq!(parse_confidence("0.5"), Some(0.5));
        assert_eq!(parse_confidence(" 80 "), Some(0.8));
        assert_eq!(parse_confidence("high"), None);
        assert_eq!(parse_confidence("250%"), None);
    }
}
