// src/services/source.rs

//! Catalog source client.
//!
//! Fetches raw product, category, price and brand-attribute data from the
//! commerce backend's REST API. Products come back as a lazy paged stream
//! (finite, one pass per call, not restartable); the smaller feeds are
//! fetched whole. Retry is the orchestrator's job, never this client's.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{
    Config, RawAttributeOptions, RawCatalog, RawCategory, RawPrice, RawProduct,
};
use crate::utils::http;
use crate::utils::rate_limit::RateLimiter;

/// What slice of the catalog a fetch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    /// The entire catalog, ignoring modification time
    Full,
    /// Only entities modified at or after the cutoff
    ChangedSince(DateTime<Utc>),
}

/// Seam for the orchestrator: anything that can produce a raw catalog.
#[async_trait]
pub trait CatalogFeed: Send + Sync {
    async fn fetch_catalog(&self, scope: FetchScope) -> Result<RawCatalog>;
}

/// Generic search-API response envelope.
#[derive(Debug, Deserialize)]
struct SearchEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    total_count: Option<u64>,
}

/// Client for the commerce backend's catalog API.
pub struct CatalogSource {
    config: Arc<Config>,
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl CatalogSource {
    /// Create a new source client sharing the given rate limiter.
    pub fn new(config: Arc<Config>, limiter: Arc<RateLimiter>) -> Result<Self> {
        let source = &config.source;
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if !source.auth_header_value.is_empty() {
            headers.push(("Authorization", &source.auth_header_value));
        }
        if !source.secret_header_name.is_empty() {
            headers.push((&source.secret_header_name, &source.secret_header_value));
        }
        let client = http::create_client_with_headers(source.timeout_secs, &headers)?;

        Ok(Self {
            config,
            client,
            limiter,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/V1/{}",
            self.config.source.api_url.trim_end_matches('/'),
            self.config.source.store_code,
            path
        )
    }

    /// Search criteria for one product page.
    ///
    /// Only enabled products are fetched; an incremental scope adds an
    /// `updated_at >= cutoff` filter group in the backend's local
    /// timestamp format.
    fn product_query(scope: &FetchScope, page: usize, page_size: usize) -> Vec<(String, String)> {
        let mut query = vec![
            (
                "searchCriteria[filter_groups][0][filters][0][field]".to_string(),
                "status".to_string(),
            ),
            (
                "searchCriteria[filter_groups][0][filters][0][value]".to_string(),
                "1".to_string(),
            ),
            (
                "searchCriteria[filter_groups][0][filters][0][condition_type]".to_string(),
                "eq".to_string(),
            ),
            (
                "searchCriteria[pageSize]".to_string(),
                page_size.to_string(),
            ),
            (
                "searchCriteria[currentPage]".to_string(),
                page.to_string(),
            ),
        ];

        if let FetchScope::ChangedSince(cutoff) = scope {
            query.extend([
                (
                    "searchCriteria[filter_groups][1][filters][0][field]".to_string(),
                    "updated_at".to_string(),
                ),
                (
                    "searchCriteria[filter_groups][1][filters][0][value]".to_string(),
                    cutoff.format("%Y-%m-%d %H:%M:%S").to_string(),
                ),
                (
                    "searchCriteria[filter_groups][1][filters][0][condition_type]".to_string(),
                    "gteq".to_string(),
                ),
            ]);
        }

        query
    }

    /// Rate-limited GET, classifying failures per the error taxonomy.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        context: &'static str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T> {
        self.limiter.acquire().await;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::upstream(context, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::upstream(context, format!("HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::malformed(format!("{context}: {e}")))
    }

    async fn fetch_product_page(
        &self,
        scope: &FetchScope,
        page: usize,
    ) -> Result<Vec<RawProduct>> {
        let url = self.endpoint("products");
        let query = Self::product_query(scope, page, self.config.source.page_size);
        let envelope: SearchEnvelope<RawProduct> =
            self.get_json("products", &url, &query).await?;

        // The backend omits total_count when the query itself failed and
        // reports the problem inside an otherwise-200 body.
        if envelope.total_count.is_none() {
            return Err(AppError::malformed(
                "product search response has no total_count",
            ));
        }
        Ok(envelope.items)
    }

    /// Lazy paged stream over the products in scope. One pass per call.
    pub fn products(
        &self,
        scope: FetchScope,
    ) -> impl Stream<Item = Result<RawProduct>> + '_ {
        let page_size = self.config.source.page_size;
        stream::try_unfold(Some(1usize), move |state| async move {
            let Some(page) = state else {
                return Ok::<_, AppError>(None);
            };
            let items = self.fetch_product_page(&scope, page).await?;
            if items.is_empty() {
                return Ok(None);
            }
            let next = (items.len() == page_size).then_some(page + 1);
            Ok(Some((items, next)))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
        .try_flatten()
    }

    async fn fetch_categories(&self) -> Result<Vec<RawCategory>> {
        let url = self.endpoint("categories/list");
        let query = vec![(
            "searchCriteria[pageSize]".to_string(),
            "1000".to_string(),
        )];
        let envelope: SearchEnvelope<RawCategory> =
            self.get_json("categories", &url, &query).await?;
        Ok(envelope.items)
    }

    async fn fetch_prices(&self) -> Result<Vec<RawPrice>> {
        let url = self.endpoint("prices");
        let envelope: SearchEnvelope<RawPrice> = self.get_json("prices", &url, &[]).await?;
        Ok(envelope.items)
    }

    async fn fetch_brand_options(&self) -> Result<RawAttributeOptions> {
        let code = &self.config.sync.brand_attribute_code;
        let url = self.endpoint(&format!("products/attributes/{code}/options"));
        let options = self.get_json("brand options", &url, &[]).await?;
        Ok(RawAttributeOptions {
            attribute_code: code.clone(),
            options,
        })
    }
}

#[async_trait]
impl CatalogFeed for CatalogSource {
    /// Drain all four feeds for the given scope.
    ///
    /// When the product scope is empty the remaining feeds are skipped;
    /// there is nothing to join them against.
    async fn fetch_catalog(&self, scope: FetchScope) -> Result<RawCatalog> {
        let products: Vec<RawProduct> = self.products(scope).try_collect().await?;
        log::info!("Fetched {} products from source", products.len());

        if products.is_empty() {
            return Ok(RawCatalog::default());
        }

        let categories = self.fetch_categories().await?;
        let prices = self.fetch_prices().await?;
        let brand_options = self.fetch_brand_options().await?;
        log::info!(
            "Fetched {} categories, {} prices, {} brand options",
            categories.len(),
            prices.len(),
            brand_options.options.len()
        );

        Ok(RawCatalog {
            products,
            categories,
            prices,
            brand_options,
        })
    }
}
