use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Error;
use hyper::{Body, Request, StatusCode};
use tokio::net::UnixListener;
use tokio::sync::oneshot;

use convoy::daemon::Daemon;
use convoy_api_types::{
    BackupCreateRequest, BackupListRequest, DaemonConfig, PluginRequest, SnapshotCreateRequest,
    VolumeCreateRequest, VolumeDeleteRequest, VolumeMountRequest,
};
use convoy_client::{error_status, ConvoyClient, UnixConnector};

struct TestServer {
    dir: PathBuf,
    socket: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<Result<(), Error>>,
}

impl TestServer {
    async fn start(name: &str, create_on_docker_mount: bool) -> Self {
        let mut dir = std::fs::canonicalize(".").unwrap();
        dir.push(".testdir");
        dir.push(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("root")).unwrap();

        let config = DaemonConfig {
            root: dir.join("root").to_string_lossy().to_string(),
            driver_list: vec!["vfs".to_string()],
            default_driver: "vfs".to_string(),
            create_on_docker_mount,
            ..Default::default()
        };
        let mut opts = HashMap::new();
        opts.insert(
            "vfs.path".to_string(),
            dir.join("volumes").to_string_lossy().to_string(),
        );
        let daemon = Arc::new(Daemon::new(config, &opts).unwrap());

        let socket = dir.join("convoy.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(convoy::server::serve(daemon, listener, async move {
            let _ = rx.await;
        }));

        Self {
            dir,
            socket,
            shutdown: Some(tx),
            handle,
        }
    }

    fn client(&self) -> ConvoyClient {
        ConvoyClient::new(&self.socket)
    }

    fn volume_dir(&self, name: &str) -> PathBuf {
        self.dir.join("volumes").join(name)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await.unwrap().unwrap();
        std::fs::remove_dir_all(&self.dir).unwrap();
    }
}

fn create_request(name: &str) -> VolumeCreateRequest {
    VolumeCreateRequest {
        name: name.to_string(),
        ..Default::default()
    }
}

async fn raw_request(socket: &Path, method: &str, uri: &str, agent: &str) -> (StatusCode, String) {
    let client = hyper::Client::builder().build::<_, Body>(UnixConnector::new(socket));
    let req = Request::builder()
        .method(method)
        .uri(format!("http://localhost{}", uri))
        .header(hyper::header::USER_AGENT, agent)
        .body(Body::empty())
        .unwrap();
    let resp = client.request(req).await.unwrap();
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_volume_name_collision() {
    let server = TestServer::start("it-collision", false).await;
    let client = server.client();

    let uuid = client.volume_create(&create_request("db")).await.unwrap();
    assert!(!uuid.as_str().unwrap().is_empty());

    let err = client.volume_create(&create_request("db")).await.unwrap_err();
    assert_eq!(error_status(&err), Some(StatusCode::BAD_REQUEST));
    assert!(err.to_string().contains("already exists"));

    let err = client.volume_inspect("missing").await.unwrap_err();
    assert_eq!(error_status(&err), Some(StatusCode::NOT_FOUND));

    server.stop().await;
}

#[tokio::test]
async fn test_mount_conflict() {
    let server = TestServer::start("it-mount", false).await;
    let client = server.client();
    client.volume_create(&create_request("web")).await.unwrap();

    let mount = VolumeMountRequest {
        volume_name: "web".into(),
        ..Default::default()
    };
    let first = client.volume_mount(&mount).await.unwrap();
    let second = client.volume_mount(&mount).await.unwrap();
    assert_eq!(first, second);

    let elsewhere = VolumeMountRequest {
        volume_name: "web".into(),
        mount_point: "/mnt/elsewhere".into(),
        ..Default::default()
    };
    let err = client.volume_mount(&elsewhere).await.unwrap_err();
    assert!(err.to_string().contains("already mounted"));

    let delete = VolumeDeleteRequest {
        volume_name: "web".into(),
        reference_only: false,
    };
    assert!(client.volume_delete(&delete).await.is_err());
    client.volume_umount("web").await.unwrap();
    client.volume_delete(&delete).await.unwrap();

    let list = client.volume_list(false).await.unwrap();
    assert!(list.as_object().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_snapshot_and_backup() {
    let server = TestServer::start("it-backup", false).await;
    let client = server.client();
    client.volume_create(&create_request("db")).await.unwrap();
    std::fs::write(server.volume_dir("db").join("data"), b"hello").unwrap();

    client
        .snapshot_create(&SnapshotCreateRequest {
            name: "snap1".into(),
            volume_name: "db".into(),
            verbose: false,
        })
        .await
        .unwrap();
    let snapshot = client.snapshot_inspect("snap1").await.unwrap();
    assert_eq!(snapshot.volume_name, "db");

    let store = server.dir.join("store");
    std::fs::create_dir_all(&store).unwrap();
    let dest = format!("vfs://{}", store.display());
    let url = client
        .backup_create(&BackupCreateRequest {
            url: dest.clone(),
            snapshot_name: "snap1".into(),
            verbose: false,
        })
        .await
        .unwrap();
    let url = url.as_str().unwrap().to_string();

    let backups = client
        .backup_list(&BackupListRequest {
            url: dest.clone(),
            volume_name: "db".into(),
        })
        .await
        .unwrap();
    assert!(backups.contains_key(&url));

    // restore into a new volume
    let restored = VolumeCreateRequest {
        name: "db-restored".into(),
        backup_url: url.clone(),
        ..Default::default()
    };
    client.volume_create(&restored).await.unwrap();
    let data = std::fs::read(server.volume_dir("db-restored").join("data")).unwrap();
    assert_eq!(data, b"hello");

    client.backup_delete(&url).await.unwrap();
    client.snapshot_delete("snap1").await.unwrap();
    assert!(client.snapshot_inspect("snap1").await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_stale_attachment_recovery() {
    let server = TestServer::start("it-plugin", true).await;
    let client = server.client();

    let create = PluginRequest {
        name: "v".into(),
        opts: HashMap::new(),
    };
    let reply = client.plugin("VolumeDriver.Create", &create).await.unwrap();
    assert!(reply.err.is_empty());
    let before = client.volume_inspect("v").await.unwrap();

    std::fs::remove_dir_all(server.volume_dir("v")).unwrap();

    let reply = client.plugin("VolumeDriver.Mount", &create).await.unwrap();
    assert!(reply.err.is_empty(), "{}", reply.err);
    assert!(!reply.mountpoint.is_empty());

    let after = client.volume_inspect("v").await.unwrap();
    assert_ne!(before.uuid, after.uuid);

    let reply = client.plugin("VolumeDriver.Capabilities", &create).await.unwrap();
    assert_eq!(reply.capabilities.unwrap().scope, "local");

    server.stop().await;
}

#[tokio::test]
async fn test_routing() {
    let server = TestServer::start("it-routing", false).await;

    let (status, body) = raw_request(&server.socket, "GET", "/info", "curl/8").await;
    assert_eq!(status, StatusCode::OK);
    let info: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(info["General"]["DefaultDriver"], "vfs");

    let (status, _) = raw_request(&server.socket, "GET", "/v1/volumes/list/", "curl/8").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = raw_request(&server.socket, "GET", "/v1/info", "Convoy-Client/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("doesn't match"));

    let (status, body) = raw_request(&server.socket, "GET", "/nowhere", "curl/8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Handler not found"));

    // plugin routes are not versioned
    let (status, _) = raw_request(&server.socket, "POST", "/v1/Plugin.Activate", "curl/8").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = raw_request(&server.socket, "POST", "/Plugin.Activate", "curl/8").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("VolumeDriver"));

    server.stop().await;
}
