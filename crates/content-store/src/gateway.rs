use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::{ContentAddress, ContentError, ContentStore};

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only store that fetches objects from an HTTP gateway at `<base>/<address>`.
/// Every fetched object is checked against its address.
#[derive(Debug, Clone)]
pub struct GatewayContentStore {
    base: Url,
    client: reqwest::Client,
}

impl GatewayContentStore {
    pub fn new(base: Url) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder().timeout(GATEWAY_TIMEOUT).build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn object_url(&self, address: &ContentAddress) -> Result<Url, ContentError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ContentError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .push(&address.to_hex());
        Ok(url)
    }
}

#[async_trait]
impl ContentStore for GatewayContentStore {
    async fn get_object(&self, address: &ContentAddress) -> Result<Vec<u8>, ContentError> {
        let url = self.object_url(address)?;
        debug!(%url, "fetching object from gateway");
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ContentError::NotFound(*address));
        }
        let encoded = response.error_for_status()?.bytes().await?.to_vec();
        verify(address, &encoded)?;
        Ok(encoded)
    }

    async fn put_object(&self, _encoded: &[u8]) -> Result<ContentAddress, ContentError> {
        Err(ContentError::ReadOnly)
    }

    async fn has_object(&self, address: &ContentAddress) -> Result<bool, ContentError> {
        let response = self.client.head(self.object_url(address)?).send().await?;
        Ok(response.status().is_success())
    }

    async fn pin(&self, _address: &ContentAddress) -> Result<(), ContentError> {
        Err(ContentError::ReadOnly)
    }

    async fn is_pinned(&self, _address: &ContentAddress) -> Result<bool, ContentError> {
        Ok(false)
    }
}

fn verify(expected: &ContentAddress, encoded: &[u8]) -> Result<(), ContentError> {
    let actual = ContentAddress::of(encoded);
    if actual == *expected {
        Ok(())
    } else {
        Err(ContentError::IntegrityMismatch {
            expected: *expected,
            actual,
        })
    }
}

/// Splits `https://host/prefix/<address>` into the gateway base and the address in its last
/// path segment.
pub fn parse_gateway_url(raw: &str) -> Result<(Url, ContentAddress), ContentError> {
    let url = Url::parse(raw).map_err(|_| ContentError::InvalidUrl(raw.to_string()))?;
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .ok_or_else(|| ContentError::InvalidUrl(raw.to_string()))?;
    let address: ContentAddress = last.parse()?;

    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.path_segments_mut()
        .map_err(|()| ContentError::InvalidUrl(raw.to_string()))?
        .pop_if_empty()
        .pop();
    Ok((base, address))
}
