use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use shared::domain::{OutletId, ProductId};
use shared::protocol::ProductHit;

/// Read-only inventory collaborator backed by the point-of-sale system.
///
/// Everything here is advisory: stock levels feed snapshots and sanity
/// flags, never authoritative quantities. Calls are bounded by the client's
/// own timeout; callers record outcomes and never block a transition on
/// this collaborator.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn stock_level(&self, product_id: ProductId, outlet_id: OutletId) -> Result<i64>;

    async fn search_products(
        &self,
        keyword: &str,
        outlet_id: OutletId,
        limit: usize,
    ) -> Result<Vec<ProductHit>>;
}

#[derive(Debug, Clone)]
pub struct VendConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

/// HTTP client against the POS inventory API.
pub struct VendHttpProvider {
    http: Client,
    base_url: Url,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct StockLevelResponse {
    stock_level: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    products: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    product_id: ProductId,
    product_name: String,
    #[serde(default)]
    stock_level: i64,
}

impl VendHttpProvider {
    pub fn new(config: &VendConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid inventory base url '{}'", config.base_url))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build inventory http client")?;
        Ok(Self {
            http,
            base_url,
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl InventoryProvider for VendHttpProvider {
    async fn stock_level(&self, product_id: ProductId, outlet_id: OutletId) -> Result<i64> {
        let url = self
            .base_url
            .join(&format!("products/{}/inventory/{}", product_id, outlet_id.0))
            .context("failed to build stock level url")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("stock level request failed")?
            .error_for_status()
            .context("stock level request rejected")?;
        let body: StockLevelResponse = response
            .json()
            .await
            .context("stock level response malformed")?;
        Ok(body.stock_level)
    }

    async fn search_products(
        &self,
        keyword: &str,
        outlet_id: OutletId,
        limit: usize,
    ) -> Result<Vec<ProductHit>> {
        let mut url = self
            .base_url
            .join("products/search")
            .context("failed to build search url")?;
        url.query_pairs_mut()
            .append_pair("keyword", keyword)
            .append_pair("outlet_id", &outlet_id.0.to_string())
            .append_pair("limit", &limit.to_string());
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .context("product search request failed")?
            .error_for_status()
            .context("product search request rejected")?;
        let body: SearchResponse = response
            .json()
            .await
            .context("product search response malformed")?;
        Ok(body
            .products
            .into_iter()
            .map(|hit| ProductHit {
                product_id: hit.product_id,
                product_name: hit.product_name,
                stock_level: hit.stock_level,
            })
            .collect())
    }
}

/// Fixed in-memory inventory for tests and local development.
#[derive(Default)]
pub struct StaticInventory {
    levels: HashMap<(ProductId, OutletId), i64>,
    names: HashMap<ProductId, String>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(
        mut self,
        product_id: ProductId,
        name: &str,
        outlet_id: OutletId,
        level: i64,
    ) -> Self {
        self.levels.insert((product_id, outlet_id), level);
        self.names.insert(product_id, name.to_string());
        self
    }

    pub fn into_provider(self) -> Arc<dyn InventoryProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl InventoryProvider for StaticInventory {
    async fn stock_level(&self, product_id: ProductId, outlet_id: OutletId) -> Result<i64> {
        Ok(self
            .levels
            .get(&(product_id, outlet_id))
            .copied()
            .unwrap_or(0))
    }

    async fn search_products(
        &self,
        keyword: &str,
        outlet_id: OutletId,
        limit: usize,
    ) -> Result<Vec<ProductHit>> {
        let needle = keyword.to_ascii_lowercase();
        let mut hits: Vec<ProductHit> = self
            .names
            .iter()
            .filter(|(_, name)| name.to_ascii_lowercase().contains(&needle))
            .map(|(product_id, name)| ProductHit {
                product_id: *product_id,
                product_name: name.clone(),
                stock_level: self
                    .levels
                    .get(&(*product_id, outlet_id))
                    .copied()
                    .unwrap_or(0),
            })
            .collect();
        hits.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        hits.truncate(limit);
        Ok(hits)
    }
}
