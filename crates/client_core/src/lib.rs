//! Staff-side client: a thin typed HTTP client for the transfer server plus
//! the draft cache that survives an interrupted counting session.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use shared::{
    domain::{MergeCandidate, TransferId},
    error::ErrorCode,
    protocol::{
        ActionEnvelope, CommitPackOutcome, CommitPackPayload, CreateTransferRequest,
        DispatchPayload, LoginRequest, LoginResponse, MergeOutcome, MergePayload, ProductHit,
        ReceivePayload, SearchProductPayload, TransferView,
    },
};

pub mod draft;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    BadBaseUrl(String),
    #[error("server rejected request ({code:?}): {message}")]
    Api { code: ErrorCode, message: String },
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: ErrorCode,
    error: String,
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    transfer: shared::domain::Transfer,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    products: Vec<ProductHit>,
}

#[derive(Debug, Deserialize)]
struct CandidatesBody {
    candidates: Vec<MergeCandidate>,
}

pub struct TransferClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl TransferClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|_| ClientError::BadBaseUrl(base_url.to_string()))?;
        Ok(Self {
            http: Client::new(),
            base_url,
            token: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    pub async fn login(&mut self, username: &str) -> Result<LoginResponse, ClientError> {
        let url = self.join("login")?;
        let response = self
            .http
            .post(url)
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        let login: LoginResponse = decode_response(response).await?;
        self.token = Some(login.token.clone());
        Ok(login)
    }

    pub async fn create_transfer(
        &self,
        req: &CreateTransferRequest,
    ) -> Result<shared::domain::Transfer, ClientError> {
        let url = self.join("transfers")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token()?)
            .json(req)
            .send()
            .await?;
        let body: TransferBody = decode_response(response).await?;
        Ok(body.transfer)
    }

    pub async fn fetch_transfer(&self, id: TransferId) -> Result<TransferView, ClientError> {
        let url = self.join(&format!("transfers/{}", id.0))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        decode_response(response).await
    }

    pub async fn merge_candidates(
        &self,
        id: TransferId,
    ) -> Result<Vec<MergeCandidate>, ClientError> {
        let url = self.join(&format!("transfers/{}/merge-candidates", id.0))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        let body: CandidatesBody = decode_response(response).await?;
        Ok(body.candidates)
    }

    pub async fn commit_pack(
        &self,
        id: TransferId,
        payload: CommitPackPayload,
    ) -> Result<CommitPackOutcome, ClientError> {
        self.submit_action(
            id,
            ActionEnvelope {
                commit_pack: Some(payload),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn dispatch(
        &self,
        id: TransferId,
        payload: DispatchPayload,
    ) -> Result<shared::domain::Transfer, ClientError> {
        let body: TransferBody = self
            .submit_action(
                id,
                ActionEnvelope {
                    dispatch: Some(payload),
                    ..Default::default()
                },
            )
            .await?;
        Ok(body.transfer)
    }

    pub async fn receive(
        &self,
        id: TransferId,
        payload: ReceivePayload,
    ) -> Result<TransferView, ClientError> {
        self.submit_action(
            id,
            ActionEnvelope {
                receive: Some(payload),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_transfer(&self, id: TransferId) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .submit_action(
                id,
                ActionEnvelope {
                    delete_transfer: Some(Default::default()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn merge(
        &self,
        id: TransferId,
        other_transfer_id: TransferId,
    ) -> Result<MergeOutcome, ClientError> {
        self.submit_action(
            id,
            ActionEnvelope {
                merge: Some(MergePayload { other_transfer_id }),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn search_products(
        &self,
        id: TransferId,
        payload: SearchProductPayload,
    ) -> Result<Vec<ProductHit>, ClientError> {
        let body: SearchBody = self
            .submit_action(
                id,
                ActionEnvelope {
                    search_product: Some(payload),
                    ..Default::default()
                },
            )
            .await?;
        Ok(body.products)
    }

    async fn submit_action<R: DeserializeOwned>(
        &self,
        id: TransferId,
        envelope: ActionEnvelope,
    ) -> Result<R, ClientError> {
        let url = self.join(&format!("transfers/{}/actions", id.0))?;
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token()?)
            .json(&envelope)
            .send()
            .await?;
        decode_response(response).await
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.token.as_deref().ok_or(ClientError::NotLoggedIn)
    }

    fn join(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|_| ClientError::BadBaseUrl(self.base_url.to_string()))
    }
}

async fn decode_response<R: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<R, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        if let Ok(err) = serde_json::from_slice::<WireError>(&bytes) {
            return Err(ClientError::Api {
                code: err.code,
                message: err.error,
            });
        }
        return Err(ClientError::Api {
            code: ErrorCode::Internal,
            message: format!("http status {status}"),
        });
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_base_url() {
        assert!(matches!(
            TransferClient::new("not a url"),
            Err(ClientError::BadBaseUrl(_))
        ));
    }

    #[test]
    fn requires_login_before_actions() {
        let client = TransferClient::new("http://127.0.0.1:8443/").expect("client");
        assert!(!client.is_logged_in());
        assert!(matches!(client.token(), Err(ClientError::NotLoggedIn)));
    }

    #[test]
    fn wire_error_decodes_from_gateway_shape() {
        let raw = r#"{"success":false,"code":"guard_rejected","error":"submission disabled in restricted mode"}"#;
        let err: WireError = serde_json::from_str(raw).expect("decode");
        assert_eq!(err.code, ErrorCode::GuardRejected);
        assert!(err.error.contains("restricted"));
    }
}
