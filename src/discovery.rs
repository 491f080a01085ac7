//! Bridge discovery over SSDP.
//!
//! Every round sends one M-SEARCH, then checks each reply: the USN must hold
//! a device UUID, the SERVER header must name a Hue bridge and the device
//! description behind LOCATION must describe a Philips hue bridge. Rounds
//! get longer until one finds something.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use log::{debug, info};
use regex::Regex;
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::errors::Error;
use crate::ssdp::{ROOT_DEVICE, SearchRequest, ServiceSearch, SsdpClient, SsdpResponse};
use crate::transport::{HttpTransport, TransportConfig};

type Result<T> = std::result::Result<T, Error>;

static MODEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)philips\s+hue\s+bridge").expect("valid model name pattern"));

/// Marker every Hue bridge puts in its SERVER header.
const SERVER_MARKER: &str = "IpBridge";

const MAX_ROUNDS: u32 = 4;

/// Settings for [`BridgeLocator`].
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Search rounds to try while nothing is found, clamped to 1..=4.
    pub attempts: u32,
    pub search_target: String,
    /// Multicast TTL of the search datagram.
    pub ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            search_target: ROOT_DEVICE.to_string(),
            ttl: 2,
        }
    }
}

impl DiscoveryConfig {
    fn rounds(&self) -> u32 {
        self.attempts.clamp(1, MAX_ROUNDS)
    }

    /// Later rounds wait longer to give slow networks a chance.
    fn request(&self, round: u32) -> SearchRequest {
        SearchRequest {
            search_target: self.search_target.clone(),
            max_wait: Duration::from_secs(1 + u64::from(round)),
            socket_timeout: Duration::from_millis(500 + u64::from(round) * 1500),
            ttl: self.ttl,
        }
    }
}

/// A reply that looked like a bridge but could not be checked.
#[derive(Debug)]
pub struct CandidateError {
    pub source: SocketAddr,
    pub error: Error,
}

/// The outcome of one [`BridgeLocator::discover`] call.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// One unauthenticated bridge per device UUID.
    pub bridges: Vec<Bridge>,
    /// Candidates that were skipped because checking them failed.
    pub errors: Vec<CandidateError>,
}

/// Fetches UPnP device descriptions.
pub trait DescriptionSource: Send + Sync {
    fn fetch(&self, location: &Url) -> impl Future<Output = Result<String>> + Send;
}

/// [`DescriptionSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDescriptionSource {
    client: reqwest::Client,
}

impl HttpDescriptionSource {
    pub fn new(client: reqwest::Client) -> Self {
        HttpDescriptionSource { client }
    }
}

impl DescriptionSource for HttpDescriptionSource {
    async fn fetch(&self, location: &Url) -> Result<String> {
        self.client
            .get(location.clone())
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::transport(format!("GET {location} failed"), e))?
            .text()
            .await
            .map_err(|e| Error::transport(format!("failed to read {location}"), e))
    }
}

#[derive(Debug, Deserialize)]
struct DeviceDescription {
    #[serde(rename = "URLBase")]
    url_base: Option<String>,
    device: Option<DeviceRecord>,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    #[serde(rename = "modelName")]
    model_name: Option<String>,
}

/// Extract the base URL from a device description, if it describes a Hue bridge.
fn bridge_base_url(xml: &str) -> Result<Option<Url>> {
    let description: DeviceDescription =
        quick_xml::de::from_str(xml).map_err(|e| Error::transport("malformed device description", e))?;

    let is_bridge = description
        .device
        .and_then(|d| d.model_name)
        .is_some_and(|name| MODEL_NAME.is_match(&name));
    if !is_bridge {
        return Ok(None);
    }

    match description.url_base {
        Some(base) => Url::parse(base.trim())
            .map(Some)
            .map_err(|e| Error::transport(format!("invalid URLBase {base:?}"), e)),
        None => Ok(None),
    }
}

/// The device UUID from a USN such as `uuid:<id>::upnp:rootdevice`.
fn device_uuid(usn: &str) -> Option<Uuid> {
    let id = usn.trim().strip_prefix("uuid:")?;
    let id = id.split("::").next()?;
    Uuid::parse_str(id).ok()
}

/// Finds Hue bridges on the local network.
#[derive(Debug, Clone)]
pub struct BridgeLocator<S = SsdpClient, D = HttpDescriptionSource> {
    config: DiscoveryConfig,
    search: S,
    descriptions: D,
    client: reqwest::Client,
}

impl BridgeLocator {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let client = TransportConfig::default().build_client()?;
        Ok(Self::with_sources(
            config,
            SsdpClient,
            HttpDescriptionSource::new(client.clone()),
            client,
        ))
    }
}

impl<S: ServiceSearch, D: DescriptionSource> BridgeLocator<S, D> {
    /// Use custom search and description sources; `client` backs the returned bridges.
    pub fn with_sources(config: DiscoveryConfig, search: S, descriptions: D, client: reqwest::Client) -> Self {
        BridgeLocator {
            config,
            search,
            descriptions,
            client,
        }
    }

    /// Run search rounds until one finds a bridge or the attempts are used up.
    ///
    /// Only socket setup failures abort discovery. Problems with single
    /// candidates end up in [`DiscoveryReport::errors`].
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();

        for round in 0..self.config.rounds() {
            let request = self.config.request(round);
            let responses = self.search.search(&request).await?;
            debug!("discovery round {round}: {} replies", responses.len());

            for response in &responses {
                match self.inspect(response, &seen).await {
                    Ok(Some((uuid, bridge))) => {
                        info!("found bridge {bridge}");
                        seen.insert(uuid);
                        report.bridges.push(bridge);
                    }
                    Ok(None) => {}
                    Err(error) => {
                        info!("skipping discovery candidate {}: {error}", response.source);
                        report.errors.push(CandidateError {
                            source: response.source,
                            error,
                        });
                    }
                }
            }

            if !report.bridges.is_empty() {
                break;
            }
        }

        Ok(report)
    }

    async fn inspect(&self, response: &SsdpResponse, seen: &HashSet<Uuid>) -> Result<Option<(Uuid, Bridge)>> {
        let Some(uuid) = response.header("USN").and_then(device_uuid) else {
            return Ok(None);
        };
        if seen.contains(&uuid) {
            return Ok(None);
        }
        if !response.header("SERVER").is_some_and(|s| s.contains(SERVER_MARKER)) {
            debug!("{} is not a Hue bridge", response.source);
            return Ok(None);
        }
        let Some(location) = response.header("LOCATION").filter(|l| l.trim().ends_with(".xml")) else {
            return Ok(None);
        };

        let location = Url::parse(location.trim())
            .map_err(|e| Error::transport(format!("invalid LOCATION {location:?}"), e))?;
        let xml = self.descriptions.fetch(&location).await?;
        let Some(base_url) = bridge_base_url(&xml)? else {
            debug!("{location} does not describe a Hue bridge");
            return Ok(None);
        };

        let transport = HttpTransport::with_client(base_url, self.client.clone());
        let bridge = Bridge::discovered(Arc::new(transport), format!("uuid:{uuid}"));
        Ok(Some((uuid, bridge)))
    }
}

/// Discover bridges with the default SSDP client and HTTP settings.
pub async fn discover_bridges(config: &DiscoveryConfig) -> Result<DiscoveryReport> {
    BridgeLocator::new(config.clone())?.discover().await
}
