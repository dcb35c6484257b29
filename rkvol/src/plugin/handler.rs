//! Endpoint dispatch, independent of the HTTP server.

use hyper::StatusCode;
use libvolume::{ClusterConnector, DeviceBinder, VolumeDriver, VolumeError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::*;

/// Status and JSON body of a plugin response.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    pub fn error(status: StatusCode, err: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "Err": err.into() }),
        }
    }

    fn failed(e: VolumeError) -> Self {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Reply> {
    serde_json::from_slice(body)
        .map_err(|e| Reply::error(StatusCode::BAD_REQUEST, format!("malformed request: {e}")))
}

/// Route `path` with request `body` to the driver.
pub async fn dispatch<C, B>(driver: &VolumeDriver<C, B>, path: &str, body: &[u8]) -> Reply
where
    C: ClusterConnector,
    B: DeviceBinder,
{
    match route(driver, path, body).await {
        Ok(reply) | Err(reply) => reply,
    }
}

async fn route<C, B>(driver: &VolumeDriver<C, B>, path: &str, body: &[u8]) -> Result<Reply, Reply>
where
    C: ClusterConnector,
    B: DeviceBinder,
{
    let reply = match path {
        "/Plugin.Activate" => Reply::ok(&ActivateResponse {
            implements: vec!["VolumeDriver".to_owned()],
        }),
        "/VolumeDriver.Create" => {
            let req: CreateRequest = parse(body)?;
            let opts = req.opts.unwrap_or_default();
            driver
                .create(&req.name, &opts)
                .await
                .map_err(Reply::failed)?;
            Reply::ok(&ErrResponse::default())
        }
        "/VolumeDriver.Remove" => {
            let req: NameRequest = parse(body)?;
            driver.remove(&req.name).await.map_err(Reply::failed)?;
            Reply::ok(&ErrResponse::default())
        }
        "/VolumeDriver.Mount" => {
            let req: MountRequest = parse(body)?;
            debug!(name = %req.name, id = %req.id, "mount requested");
            let attachment = driver.mount(&req.name).await.map_err(Reply::failed)?;
            Reply::ok(&MountpointResponse {
                mountpoint: attachment.mountpoint,
                err: String::new(),
            })
        }
        "/VolumeDriver.Unmount" => {
            let req: MountRequest = parse(body)?;
            debug!(name = %req.name, id = %req.id, "unmount requested");
            driver.unmount(&req.name).await.map_err(Reply::failed)?;
            Reply::ok(&ErrResponse::default())
        }
        "/VolumeDriver.Path" => {
            let req: NameRequest = parse(body)?;
            let mountpoint = driver.path(&req.name).await.map_err(Reply::failed)?;
            Reply::ok(&MountpointResponse {
                mountpoint,
                err: String::new(),
            })
        }
        "/VolumeDriver.Get" => {
            let req: NameRequest = parse(body)?;
            let volume = driver.get(&req.name).await.map_err(Reply::failed)?;
            Reply::ok(&GetResponse {
                volume: volume.summary().into(),
                err: String::new(),
            })
        }
        "/VolumeDriver.List" => {
            let volumes = driver.list().await.map_err(Reply::failed)?;
            Reply::ok(&ListResponse {
                volumes: volumes.into_iter().map(VolumeInfo::from).collect(),
                err: String::new(),
            })
        }
        "/VolumeDriver.Capabilities" => Reply::ok(&CapabilitiesResponse {
            capabilities: CapabilityInfo {
                scope: driver.capabilities().scope,
            },
        }),
        other => {
            warn!(path = other, "unknown plugin endpoint");
            Reply::error(StatusCode::NOT_FOUND, "unknown endpoint")
        }
    };
    Ok(reply)
}
