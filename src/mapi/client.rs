//! Maya API server REST client
//!
//! Stateless binding of the volume create/get/delete/list calls. Every call
//! carries one bounded timeout (narrowed by the caller's deadline) and is
//! never retried; non-200 answers come back as `Error::ExternalService`.

use crate::context::CallContext;
use crate::domain::ports::VolumeDirectory;
use crate::domain::volume::{Volume, VolumeList, VolumeSpec};
use crate::error::{Error, Result};
use crate::mapi::config::MapiConfig;
use crate::mapi::urls;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use std::sync::Arc;
use tracing::{debug, info};

const YAML_CONTENT_TYPE: &str = "application/yaml";

/// REST client for one maya API server endpoint
#[derive(Debug, Clone)]
pub struct MapiClient {
    config: Arc<MapiConfig>,
    http: Client,
}

impl MapiClient {
    pub fn new(config: Arc<MapiConfig>) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &MapiConfig {
        &self.config
    }

    /// GET `url`, failing on anything but 200
    async fn get(&self, ctx: &CallContext, url: Url) -> Result<Response> {
        let timeout = ctx.bounded(self.config.timeout);
        let resp = ctx
            .run(async {
                self.http
                    .get(url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(Error::from)
            })
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::ExternalService {
                status: resp.status(),
            });
        }
        Ok(resp)
    }

    async fn read_body(&self, ctx: &CallContext, resp: Response) -> Result<Vec<u8>> {
        let bytes = ctx
            .run(async { resp.bytes().await.map_err(Error::from) })
            .await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl VolumeDirectory for MapiClient {
    async fn create_volume(&self, ctx: &CallContext, spec: &VolumeSpec) -> Result<()> {
        let body = serde_yaml::to_string(spec)?;
        debug!("Volume spec yaml created:\n{}", body);

        let url = urls::volumes_url(&self.config.uri, &self.config.version)?;
        debug!("Create volume URL {}", url);

        let timeout = ctx.bounded(self.config.timeout);
        let resp = ctx
            .run(async {
                self.http
                    .post(url)
                    .header(CONTENT_TYPE, YAML_CONTENT_TYPE)
                    .body(body)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(Error::from)
            })
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Error::ExternalService {
                status: resp.status(),
            });
        }

        let data = self.read_body(ctx, resp).await?;
        debug!(
            "Volume {} created:\n{}",
            spec.name(),
            String::from_utf8_lossy(&data)
        );
        Ok(())
    }

    async fn get_volume(&self, ctx: &CallContext, name: &str) -> Result<Volume> {
        let url = urls::info_url(&self.config.uri, &self.config.version, name)?;
        debug!("Requesting volume details at {}", url);

        let resp = self.get(ctx, url).await?;
        let data = self.read_body(ctx, resp).await?;
        let volume: Volume = serde_json::from_slice(&data)?;

        debug!("Volume details retrieved for {}", name);
        Ok(volume)
    }

    async fn delete_volume(&self, ctx: &CallContext, name: &str) -> Result<()> {
        let url = urls::delete_url(&self.config.uri, &self.config.version, name)?;
        debug!("Requesting volume delete at {}", url);

        match self.get(ctx, url).await {
            Ok(_) => {
                info!("Volume deletion initiated for {}", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!("Volume {} already absent", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<Volume>> {
        let url = urls::volumes_url(&self.config.uri, &self.config.version)?;
        debug!("Requesting volume list at {}", url);

        let resp = self.get(ctx, url).await?;
        let data = self.read_body(ctx, resp).await?;
        let list: VolumeList = serde_json::from_slice(&data)?;

        debug!("Retrieved {} volumes", list.items.len());
        Ok(list.items)
    }
}
