use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use shared::domain::Transfer;
use shared::protocol::PackageSpec;

/// Result of a label booking. Only the tracking code is ever persisted by
/// the transfer core; the label artifact is handed straight back to the
/// caller for printing.
#[derive(Debug, Clone)]
pub struct LabelResult {
    pub tracking_code: String,
    pub label_pdf_b64: Option<String>,
}

/// Shipping collaborator seam. Booking failures are the caller's to absorb:
/// a transfer commit never depends on this call completing.
#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn create_label(&self, transfer: &Transfer, package: &PackageSpec)
        -> Result<LabelResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourierService {
    NzPost,
    GroundCourier,
}

impl CourierService {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "nzpost" => Some(Self::NzPost),
            "ground" => Some(Self::GroundCourier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CourierConfig {
    pub service: CourierService,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

/// HTTP label booking against the configured courier API.
pub struct CourierHttpProvider {
    http: Client,
    base_url: Url,
    api_key: String,
    service: CourierService,
}

#[derive(Debug, Serialize)]
struct LabelRequest<'a> {
    transfer_reference: String,
    destination_outlet_id: i64,
    weight_grams: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    length_mm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width_mm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height_mm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    tracking_code: String,
    #[serde(default)]
    label_pdf: Option<Vec<u8>>,
    #[serde(default)]
    label_pdf_b64: Option<String>,
}

impl CourierHttpProvider {
    pub fn new(config: &CourierConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid courier base url '{}'", config.base_url))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build courier http client")?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            service: config.service,
        })
    }

    fn booking_path(&self) -> &'static str {
        match self.service {
            CourierService::NzPost => "nzpost/labels",
            CourierService::GroundCourier => "ground/labels",
        }
    }
}

#[async_trait]
impl ShippingProvider for CourierHttpProvider {
    async fn create_label(
        &self,
        transfer: &Transfer,
        package: &PackageSpec,
    ) -> Result<LabelResult> {
        let url = self
            .base_url
            .join(self.booking_path())
            .context("failed to build label url")?;
        let request = LabelRequest {
            transfer_reference: format!("ST-{}", transfer.id.0),
            destination_outlet_id: transfer.destination_outlet_id.0,
            weight_grams: package.weight_grams,
            length_mm: package.length_mm,
            width_mm: package.width_mm,
            height_mm: package.height_mm,
            instructions: package.instructions.as_deref(),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("label booking request failed")?
            .error_for_status()
            .context("label booking rejected")?;
        let body: LabelResponse = response
            .json()
            .await
            .context("label booking response malformed")?;

        let label_pdf_b64 = body
            .label_pdf_b64
            .or_else(|| body.label_pdf.map(|bytes| STANDARD.encode(bytes)));
        Ok(LabelResult {
            tracking_code: body.tracking_code,
            label_pdf_b64,
        })
    }
}

/// No-op provider for deployments without courier credentials. Booking
/// reports failure so the caller records a warning instead of a label.
pub struct Disabled;

#[async_trait]
impl ShippingProvider for Disabled {
    async fn create_label(
        &self,
        _transfer: &Transfer,
        _package: &PackageSpec,
    ) -> Result<LabelResult> {
        anyhow::bail!("no courier service configured")
    }
}
