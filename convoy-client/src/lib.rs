//! Client for the daemon's unix socket API.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{format_err, Error};
use futures::*;
use http::{Request, Response, StatusCode};
use hyper::client::Client;
use hyper::Body;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use proxmox_router::HttpError;

use convoy_api_types::{
    BackupCreateRequest, BackupDeleteRequest, BackupInfo, BackupInspectRequest,
    BackupListRequest, ErrorResponse, PluginRequest, PluginResponse, SnapshotCreateRequest,
    SnapshotDeleteRequest, SnapshotInspectRequest, SnapshotResponse, VolumeCreateRequest,
    VolumeDeleteRequest, VolumeInspectRequest, VolumeMountRequest, VolumeResponse,
    VolumeUmountRequest,
};

mod unix_connector;
pub use unix_connector::{UnixConnection, UnixConnector};

/// HTTP client talking to the daemon over its unix socket.
pub struct ConvoyClient {
    client: Client<UnixConnector>,
    socket: PathBuf,
    user_agent: String,
}

impl ConvoyClient {
    pub fn new<P: Into<PathBuf>>(socket: P) -> Self {
        let socket = socket.into();
        let client = Client::builder().build::<_, Body>(UnixConnector::new(socket.clone()));
        Self {
            client,
            socket,
            user_agent: convoy_buildcfg::client_user_agent(),
        }
    }

    /// Client using the default daemon socket.
    pub fn default_socket() -> Self {
        Self::new(convoy_buildcfg::CONVOY_SOCKET_FN)
    }

    pub fn socket(&self) -> &PathBuf {
        &self.socket
    }

    /// Send a request to `path` below the versioned API prefix.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        data: Option<Value>,
    ) -> Result<Value, Error> {
        let path = format!(
            "/v{}/{}",
            convoy_buildcfg::API_VERSION,
            path.trim_start_matches('/')
        );
        let req = self.request_builder(method, &path, query, data)?;
        self.api_request(req).await
    }

    pub async fn get(&self, path: &str, data: Option<Value>) -> Result<Value, Error> {
        self.request("GET", path, &[], data).await
    }

    pub async fn post(&self, path: &str, data: Option<Value>) -> Result<Value, Error> {
        self.request("POST", path, &[], data).await
    }

    pub async fn delete(&self, path: &str, data: Option<Value>) -> Result<Value, Error> {
        self.request("DELETE", path, &[], data).await
    }

    async fn api_response(response: Response<Body>) -> Result<Value, Error> {
        let status = response.status();
        let data = hyper::body::to_bytes(response.into_body()).await?;

        let text = String::from_utf8(data.to_vec())
            .map_err(|err| format_err!("got invalid utf8 response - {}", err))?;
        if status.is_success() {
            if text.is_empty() {
                Ok(Value::Null)
            } else {
                let value: Value = serde_json::from_str(&text)?;
                Ok(value)
            }
        } else {
            let message = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(resp) => resp.error,
                Err(_) => text,
            };
            Err(Error::from(HttpError::new(status, message)))
        }
    }

    async fn api_request(&self, req: Request<Body>) -> Result<Value, Error> {
        self.client
            .request(req)
            .map_err(Error::from)
            .and_then(Self::api_response)
            .await
    }

    fn request_builder(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        data: Option<Value>,
    ) -> Result<Request<Body>, Error> {
        let mut url = format!("http://localhost{}", path);
        if !query.is_empty() {
            let query: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, NON_ALPHANUMERIC)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        let builder = Request::builder()
            .method(method)
            .uri(url)
            .header(hyper::header::USER_AGENT, &self.user_agent);

        let request = match data {
            Some(data) => builder
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(data.to_string()))?,
            None => builder.body(Body::empty())?,
        };
        Ok(request)
    }

    async fn call<T: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        data: &T,
    ) -> Result<R, Error> {
        let value = self
            .request(method, path, &[], Some(serde_json::to_value(data)?))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn info(&self) -> Result<Value, Error> {
        self.get("info", None).await
    }

    /// List volumes keyed by UUID, or the raw driver view with `driver_info`.
    pub async fn volume_list(&self, driver_info: bool) -> Result<Value, Error> {
        let query: &[(&str, &str)] = if driver_info { &[("driver", "1")] } else { &[] };
        self.request("GET", "volumes/list", query, None).await
    }

    pub async fn volume_inspect(&self, name: &str) -> Result<VolumeResponse, Error> {
        let req = VolumeInspectRequest {
            volume_name: name.to_string(),
        };
        self.call("GET", "volumes/", &req).await
    }

    /// Returns the UUID, or the full volume with `verbose` set.
    pub async fn volume_create(&self, req: &VolumeCreateRequest) -> Result<Value, Error> {
        self.call("POST", "volumes/create", req).await
    }

    /// Returns the mount point, or the full volume with `verbose` set.
    pub async fn volume_mount(&self, req: &VolumeMountRequest) -> Result<Value, Error> {
        self.call("POST", "volumes/mount", req).await
    }

    pub async fn volume_umount(&self, name: &str) -> Result<(), Error> {
        let req = VolumeUmountRequest {
            volume_name: name.to_string(),
        };
        let _: Value = self.call("POST", "volumes/umount", &req).await?;
        Ok(())
    }

    pub async fn volume_delete(&self, req: &VolumeDeleteRequest) -> Result<(), Error> {
        let _: Value = self.call("DELETE", "volumes/", req).await?;
        Ok(())
    }

    pub async fn snapshot_create(&self, req: &SnapshotCreateRequest) -> Result<Value, Error> {
        self.call("POST", "snapshots/create", req).await
    }

    pub async fn snapshot_inspect(&self, name: &str) -> Result<SnapshotResponse, Error> {
        let req = SnapshotInspectRequest {
            snapshot_name: name.to_string(),
        };
        self.call("GET", "snapshots/", &req).await
    }

    pub async fn snapshot_delete(&self, name: &str) -> Result<(), Error> {
        let req = SnapshotDeleteRequest {
            snapshot_name: name.to_string(),
        };
        let _: Value = self.call("DELETE", "snapshots/", &req).await?;
        Ok(())
    }

    pub async fn backup_list(
        &self,
        req: &BackupListRequest,
    ) -> Result<HashMap<String, BackupInfo>, Error> {
        self.call("GET", "backups/list", req).await
    }

    pub async fn backup_inspect(&self, url: &str) -> Result<BackupInfo, Error> {
        let req = BackupInspectRequest {
            url: url.to_string(),
        };
        self.call("GET", "backups/inspect", &req).await
    }

    /// Returns the backup URL, or the backup info with `verbose` set.
    pub async fn backup_create(&self, req: &BackupCreateRequest) -> Result<Value, Error> {
        self.call("POST", "backups/create", req).await
    }

    pub async fn backup_delete(&self, url: &str) -> Result<(), Error> {
        let req = BackupDeleteRequest {
            url: url.to_string(),
        };
        let _: Value = self.call("DELETE", "backups", &req).await?;
        Ok(())
    }

    /// Call a plugin protocol method such as `VolumeDriver.Mount`.
    ///
    /// Plugin routes are not versioned.
    pub async fn plugin(&self, method: &str, req: &PluginRequest) -> Result<PluginResponse, Error> {
        let path = format!("/{}", method);
        let req = self.request_builder("POST", &path, &[], Some(serde_json::to_value(req)?))?;
        let value = self.api_request(req).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// HTTP status of a failed request, if the daemon answered.
pub fn error_status(err: &Error) -> Option<StatusCode> {
    err.downcast_ref::<HttpError>().map(|err| err.code)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_builder() {
        let client = ConvoyClient::new("/tmp/convoy-test.sock");
        let req = client
            .request_builder("GET", "/v1/volumes/list", &[("driver", "1")], None)
            .unwrap();
        assert_eq!(req.uri().path(), "/v1/volumes/list");
        assert_eq!(req.uri().query(), Some("driver=1"));
        assert_eq!(
            req.headers()[hyper::header::USER_AGENT],
            convoy_buildcfg::client_user_agent().as_str()
        );

        let req = client
            .request_builder("POST", "/VolumeDriver.Get", &[], Some(serde_json::json!({"Name": "x"})))
            .unwrap();
        assert_eq!(req.headers()[hyper::header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_connect_error() {
        let client = ConvoyClient::new("/nonexistent/convoy.sock");
        assert!(client.info().await.is_err());
    }
}
