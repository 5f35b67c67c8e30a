use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::types::{UploadBatch, UploadResponse, UploadResults};
use super::Transport;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::model::{MutationKind, QueuedMutation, ReferenceSnapshot};
use crate::session::Session;

/// Campus API client over HTTPS with bearer authentication.
#[derive(Clone)]
pub struct HttpTransport {
  http: reqwest::Client,
  base_url: Url,
  server: ServerConfig,
  session: Session,
}

impl HttpTransport {
  pub fn new(server: &ServerConfig, session: Session) -> Result<Self> {
    let base_url = Url::parse(&server.url)?;
    let http = reqwest::Client::builder()
      .timeout(server.timeout())
      .build()
      .map_err(|e| Error::Network(format!("failed to build http client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      server: server.clone(),
      session,
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    Ok(self.base_url.join(path)?)
  }

  /// Attach the credential, send, and classify the response.
  async fn send(&self, req: RequestBuilder) -> Result<String> {
    let token = self.session.bearer_token()?;
    let response = req.bearer_auth(token).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return Err(Error::Auth(format!("server responded {}", status)));
    }
    if !status.is_success() {
      return Err(Error::Server {
        status: status.as_u16(),
        body,
      });
    }

    Ok(body)
  }

  async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
    let body = self.send(req).await?;
    // Unreadable bodies count as server-side failures
    serde_json::from_str(&body).map_err(|e| Error::Server {
      status: StatusCode::OK.as_u16(),
      body: format!("malformed response: {}", e),
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  #[instrument(skip_all, fields(payments = batch.payments.len(), attendance = batch.attendance.len()))]
  async fn upload(&self, batch: &UploadBatch) -> Result<UploadResults> {
    let url = self.url(&self.server.upload_path)?;
    let response: UploadResponse = self.send_json(self.http.post(url).json(batch)).await?;
    debug!(
      payments = response.results.payments.success.len(),
      attendance = response.results.attendance.success.len(),
      "upload acknowledged"
    );
    Ok(response.results)
  }

  #[instrument(skip_all)]
  async fn download(&self) -> Result<ReferenceSnapshot> {
    let url = self.url(&self.server.download_path)?;
    self.send_json(self.http.get(url)).await
  }

  #[instrument(skip_all, fields(key = %mutation.idempotency_key))]
  async fn submit(&self, mutation: &QueuedMutation) -> Result<()> {
    let path = match mutation.kind() {
      MutationKind::Payments => &self.server.payment_path,
      MutationKind::Attendance => &self.server.attendance_path,
    };
    let url = self.url(path)?;
    self.send(self.http.post(url).json(mutation)).await?;
    Ok(())
  }
}
