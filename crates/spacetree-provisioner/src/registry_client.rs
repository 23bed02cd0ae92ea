use std::time::Duration;

use async_trait::async_trait;

use reqwest::header::{AUTHORIZATION, IF_MATCH};
use reqwest::{Client, StatusCode, Url};

use serde::Serialize;

use spacetree::registry::{BulkRegistryResult, ExportImportDevice, RegistryJob};

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::service::DeviceRegistry;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
const EXPORT_BLOB_NAME: &str = "devices.txt";

/// Default version of the registry API.
pub const REGISTRY_API_VERSION: &str = "2021-04-12";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportJobRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    output_blob_container_uri: &'a str,
    exclude_keys_in_export: bool,
}

fn address_error(error: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Validation, format!("Invalid registry address: {error}"))
}

/// A client of the device identity registry.
#[derive(Debug, Clone)]
pub struct HttpDeviceRegistry {
    client: Client,
    host_name: String,
    base: Url,
    access_token: String,
    export_container: Url,
    api_version: String,
}

impl HttpDeviceRegistry {
    /// Creates a [`HttpDeviceRegistry`].
    ///
    /// - `host_name` is the registry host, for example `hub.example.net`
    /// - `access_token` is a signed registry access token, sent as is
    /// - `export_container` is the signed address of the blob container
    ///   receiving export jobs output
    ///
    /// # Errors
    ///
    /// An error is returned when an address is invalid or the underlying
    /// client cannot be built.
    pub fn new(
        host_name: impl Into<String>,
        access_token: impl Into<String>,
        export_container: &str,
    ) -> Result<Self> {
        let host_name = host_name.into();
        let base = Url::parse(&format!("https://{host_name}/")).map_err(address_error)?;
        let export_container = Url::parse(export_container).map_err(address_error)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            host_name,
            base,
            access_token: access_token.into(),
            export_container,
            api_version: REGISTRY_API_VERSION.into(),
        })
    }

    /// Sets the version of the registry API.
    #[must_use]
    #[inline]
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        let mut url = self.base.join(path).map_err(address_error)?;
        let _ = url
            .query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn export_blob(&self) -> Result<Url> {
        let mut url = self.export_container.clone();
        let _ = url
            .path_segments_mut()
            .map_err(|()| address_error("the export container cannot hold blobs"))?
            .pop_if_empty()
            .push(EXPORT_BLOB_NAME);
        Ok(url)
    }

    async fn failure(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let kind = if status == StatusCode::NOT_FOUND {
            ErrorKind::NotFound
        } else {
            ErrorKind::Remote
        };
        Error::new(kind, format!("Registry answered {status}: {body}"))
    }

    async fn job_response(response: reqwest::Response) -> Result<RegistryJob> {
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(response.json::<RegistryJob>().await?)
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    fn host_name(&self) -> &str {
        &self.host_name
    }

    async fn bulk(&self, devices: &[ExportImportDevice]) -> Result<BulkRegistryResult> {
        let url = self.url("devices")?;
        debug!("POST {url} with {} devices", devices.len());

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, &self.access_token)
            .json(devices)
            .send()
            .await?;

        // Per-device failures come with a non-success status and a result body.
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<BulkRegistryResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) if status.is_success() => Ok(BulkRegistryResult::success()),
            Err(_) => Err(Error::new(
                ErrorKind::Remote,
                format!("Registry answered {status}: {body}"),
            )),
        }
    }

    async fn start_export(&self) -> Result<RegistryJob> {
        let url = self.url("jobs/create")?;
        debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, &self.access_token)
            .json(&ExportJobRequest {
                kind: "export",
                output_blob_container_uri: self.export_container.as_str(),
                exclude_keys_in_export: false,
            })
            .send()
            .await?;
        Self::job_response(response).await
    }

    async fn job(&self, job_id: &str) -> Result<RegistryJob> {
        let url = self.url(&format!("jobs/{job_id}"))?;
        debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, &self.access_token)
            .send()
            .await?;
        Self::job_response(response).await
    }

    async fn download_export(&self) -> Result<String> {
        let response = self.client.get(self.export_blob()?).send().await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(response.text().await?)
    }

    async fn delete_device(&self, id: &str) -> Result<()> {
        let mut url = self.base.join("devices/").map_err(address_error)?;
        let _ = url
            .path_segments_mut()
            .map_err(|()| address_error("the registry cannot address devices"))?
            .pop_if_empty()
            .push(id);
        let _ = url
            .query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        debug!("DELETE {url}");

        let response = self
            .client
            .delete(url)
            .header(AUTHORIZATION, &self.access_token)
            .header(IF_MATCH, "*")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }
        Ok(())
    }
}
