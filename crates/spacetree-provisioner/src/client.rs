use std::time::Duration;

use async_trait::async_trait;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use serde::{Serialize, de::DeserializeOwned};

use spacetree::topology::{
    BlobUpload, Device, Endpoint, Keystore, Matcher, Property, PropertyKey, Resource,
    RoleAssignment, Space, SpaceType, UserDefinedFunction,
};

use tracing::debug;

use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::service::TopologyService;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

fn url_error(error: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::Validation, format!("Invalid service address: {error}"))
}

// Identifiers are returned as a quoted string.
fn parse_id(body: &str) -> Result<Uuid> {
    let trimmed = body.trim().trim_matches('"');
    Uuid::parse_str(trimmed).map_err(|e| {
        Error::new(
            ErrorKind::Json,
            format!("Invalid identifier `{trimmed}` in response: {e}"),
        )
    })
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let kind = if status == StatusCode::NOT_FOUND {
        ErrorKind::NotFound
    } else {
        ErrorKind::Remote
    };

    Err(Error::new(
        kind,
        format!("{status} from `{}`: {body}", url.path()),
    ))
}

// Literals are single-quoted, with embedded quotes doubled.
fn odata_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn space_filter(name: &str, parent_id: Option<Uuid>) -> String {
    let parent = parent_id.map_or_else(|| "null".to_owned(), |id| format!("guid'{id}'"));
    format!("Name eq {} and ParentSpaceId eq {parent}", odata_string(name))
}

fn keystore_filter(name: &str, space_id: Uuid) -> String {
    format!(
        "Name eq {} and SpaceId eq guid'{space_id}'",
        odata_string(name)
    )
}

fn json_part(value: &impl Serialize) -> Result<Part> {
    Ok(Part::text(serde_json::to_string(value)?).mime_str("application/json; charset=utf-8")?)
}

/// A client of the topology management service.
#[derive(Debug, Clone)]
pub struct TopologyClient {
    client: Client,
    base: Url,
    access_token: String,
}

impl TopologyClient {
    /// Creates a [`TopologyClient`] for the given management endpoint,
    /// authenticating every request with a bearer access token.
    ///
    /// A trailing `/` is appended to the endpoint when missing.
    ///
    /// # Errors
    ///
    /// An error is returned when the endpoint is not a valid address or the
    /// underlying client cannot be built.
    pub fn new(endpoint: &str, access_token: impl Into<String>) -> Result<Self> {
        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_owned()
        } else {
            format!("{endpoint}/")
        };

        let base = Url::parse(&endpoint).map_err(url_error)?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base,
            access_token: access_token.into(),
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base.join(path).map_err(url_error)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                let _ = pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        check(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path, query)?;
        debug!("GET {url}");
        Ok(self.send(self.client.get(url)).await?.json::<T>().await?)
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        match self.get(path, query).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        let url = self.url(path, &[])?;
        debug!("POST {url}");
        Ok(self
            .send(self.client.post(url).json(body))
            .await?
            .text()
            .await?)
    }

    async fn create<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Uuid> {
        parse_id(&self.post(path, body).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.url(path, &[])?;
        debug!("DELETE {url}");
        let _ = self.send(self.client.delete(url)).await?;
        Ok(())
    }

    fn blob_form(blob: &BlobUpload) -> Result<Form> {
        let contents = Part::bytes(blob.contents.clone())
            .file_name(blob.metadata.name.clone())
            .mime_str(&blob.content_type)?;
        Ok(Form::new()
            .part("metadata", json_part(&blob.metadata)?)
            .part("contents", contents))
    }

    fn function_form(function: &UserDefinedFunction, script: &str) -> Result<Form> {
        Ok(Form::new()
            .part("metadata", json_part(function)?)
            .part("contents", Part::text(script.to_owned())))
    }
}

#[async_trait]
impl TopologyService for TopologyClient {
    async fn find_spaces(&self, name: &str, parent_id: Option<Uuid>) -> Result<Vec<Space>> {
        let filter = space_filter(name, parent_id);
        self.get("spaces", &[("$filter", filter.as_str())]).await
    }

    async fn space(&self, id: Uuid) -> Result<Option<Space>> {
        self.get_optional(&format!("spaces/{id}"), &[("includes", "fullpath,Properties")])
            .await
    }

    async fn create_space(&self, space: &Space) -> Result<Uuid> {
        self.create("spaces", space).await
    }

    async fn delete_space(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("spaces/{id}")).await
    }

    async fn find_keystores(&self, name: &str, space_id: Uuid) -> Result<Vec<Keystore>> {
        let filter = keystore_filter(name, space_id);
        self.get("keystores", &[("$filter", filter.as_str())]).await
    }

    async fn create_keystore(&self, keystore: &Keystore) -> Result<Uuid> {
        self.create("keystores", keystore).await
    }

    async fn create_keystore_key(&self, keystore_id: Uuid) -> Result<()> {
        let url = self.url(&format!("keystores/{keystore_id}/keys"), &[])?;
        let _ = self.send(self.client.post(url)).await?;
        Ok(())
    }

    async fn device_token(&self, keystore_id: Uuid, hardware_id: &str) -> Result<String> {
        let url = self.url(
            &format!("keystores/{keystore_id}/keys/last/token"),
            &[("deviceMac", hardware_id)],
        )?;
        let token = self.send(self.client.get(url)).await?.text().await?;
        Ok(token.trim().trim_matches('"').to_owned())
    }

    async fn resources(&self, space_id: Uuid) -> Result<Vec<Resource>> {
        let space_id = space_id.to_string();
        self.get(
            "resources",
            &[("spaceId", space_id.as_str()), ("traverse", "Down")],
        )
        .await
    }

    async fn resource(&self, id: Uuid) -> Result<Option<Resource>> {
        self.get_optional(&format!("resources/{id}"), &[]).await
    }

    async fn create_resource(&self, resource: &Resource) -> Result<Uuid> {
        self.create("resources", resource).await
    }

    async fn delete_resource(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("resources/{id}")).await
    }

    async fn types(&self, space_id: Uuid) -> Result<Vec<SpaceType>> {
        let space_id = space_id.to_string();
        self.get("types", &[("spaceId", space_id.as_str())]).await
    }

    async fn create_type(&self, kind: &SpaceType) -> Result<Uuid> {
        self.create("types", kind).await
    }

    async fn find_devices(&self, hardware_ids: &[&str]) -> Result<Vec<Device>> {
        let hardware_ids = hardware_ids.join(";");
        self.get("devices", &[("hardwareIds", hardware_ids.as_str())])
            .await
    }

    async fn create_device(&self, device: &Device) -> Result<Uuid> {
        self.create("devices", device).await
    }

    async fn delete_device(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("devices/{id}")).await
    }

    async fn matchers(&self, space_id: Uuid) -> Result<Vec<Matcher>> {
        let space_id = space_id.to_string();
        self.get("matchers", &[("spaceId", space_id.as_str())])
            .await
    }

    async fn find_matchers(&self, names: &[String], space_id: Uuid) -> Result<Vec<Matcher>> {
        let names = names.join(",");
        let space_id = space_id.to_string();
        self.get(
            "matchers",
            &[("names", names.as_str()), ("spaceIds", space_id.as_str())],
        )
        .await
    }

    async fn create_matcher(&self, matcher: &Matcher) -> Result<Uuid> {
        self.create("matchers", matcher).await
    }

    async fn find_user_defined_functions(
        &self,
        name: &str,
        space_id: Uuid,
    ) -> Result<Vec<UserDefinedFunction>> {
        let space_id = space_id.to_string();
        self.get(
            "userdefinedfunctions",
            &[
                ("names", name),
                ("spaceIds", space_id.as_str()),
                ("includes", "matchers"),
            ],
        )
        .await
    }

    async fn create_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        script: &str,
    ) -> Result<Uuid> {
        let url = self.url("userdefinedfunctions", &[])?;
        let form = Self::function_form(function, script)?;
        let body = self
            .send(self.client.post(url).multipart(form))
            .await?
            .text()
            .await?;
        parse_id(&body)
    }

    async fn update_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        script: &str,
    ) -> Result<()> {
        let Some(id) = function.id else {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("The user-defined function `{}` has no identifier", function.name),
            ));
        };
        let url = self.url(&format!("userdefinedfunctions/{id}"), &[])?;
        let form = Self::function_form(function, script)?;
        let _ = self.send(self.client.patch(url).multipart(form)).await?;
        Ok(())
    }

    async fn find_role_assignments(
        &self,
        path: &str,
        object_id: &str,
    ) -> Result<Vec<RoleAssignment>> {
        self.get(
            "roleassignments",
            &[("path", path), ("objectId", object_id)],
        )
        .await
    }

    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        let _ = self.post("roleassignments", assignment).await?;
        Ok(())
    }

    async fn property_keys(&self, space_id: Uuid) -> Result<Vec<PropertyKey>> {
        let space_id = space_id.to_string();
        self.get("propertykeys", &[("spaceId", space_id.as_str())])
            .await
    }

    async fn create_property_key(&self, key: &PropertyKey) -> Result<()> {
        let _ = self.post("propertykeys", key).await?;
        Ok(())
    }

    async fn create_property(&self, space_id: Uuid, property: &Property) -> Result<()> {
        let _ = self
            .post(&format!("spaces/{space_id}/properties"), property)
            .await?;
        Ok(())
    }

    async fn create_blob(&self, blob: &BlobUpload) -> Result<Uuid> {
        let url = self.url("spaces/blobs", &[])?;
        let body = self
            .send(self.client.post(url).multipart(Self::blob_form(blob)?))
            .await?
            .text()
            .await?;
        parse_id(&body)
    }

    async fn update_blob(&self, id: Uuid, blob: &BlobUpload) -> Result<()> {
        let url = self.url(&format!("spaces/blobs/{id}"), &[])?;
        let _ = self
            .send(self.client.patch(url).multipart(Self::blob_form(blob)?))
            .await?;
        Ok(())
    }

    fn blob_contents_path(&self, id: Uuid) -> String {
        format!("{}spaces/blobs/{id}/contents/latest", self.base)
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.get("endpoints", &[]).await
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<Uuid> {
        self.create("endpoints", endpoint).await
    }

    async fn delete_endpoint(&self, id: Uuid) -> Result<()> {
        self.delete(&format!("endpoints/{id}")).await
    }
}
