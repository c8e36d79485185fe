//! Ellipsoid-height correction lookups.
//!
//! Converting a geoid-, tidal-, or geopotential-referenced elevation to the
//! ellipsoid height global viewers expect means asking an external geodetic
//! service for the separation at the dataset's position. Two services exist:
//! the national model service answers by model name, the regional
//! datum-transform service answers by source frame and region. Both are
//! untrusted network peers: responses may be garbled, transports may fail,
//! and the regional service rejects queries for positions outside a region.
//!
//! A failed lookup is always fatal. Treating it as a zero correction would
//! silently ship a dataset with a wrong vertical datum, which is the exact
//! failure this module exists to prevent.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::vrs::{ServiceKind, VerticalDatumChoice, REGIONS};

/// Retry behavior shared by both lookup clients.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Default policy for geodetic lookups: three attempts, one second apart.
    pub fn lookup_default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

/// Which lookup produced an adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentSource {
    /// No lookup was needed: the vertical datum choice was "none".
    NotRequired,
    NationalModel,
    RegionalTransform,
}

/// A single height correction in meters, plus where it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoidAdjustment {
    pub meters: f64,
    pub source: AdjustmentSource,
}

/// Transport-level failure, before any response interpretation.
#[derive(Debug)]
pub enum FetchError {
    Network(String),
    Malformed(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "network error: {msg}"),
            FetchError::Malformed(msg) => write!(f, "malformed response: {msg}"),
        }
    }
}

/// Seam between the retry logic and the wire. Production uses [`HttpTransport`];
/// tests script responses.
pub trait Transport {
    fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

/// Blocking HTTP transport over a shared agent.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.new_agent(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|err| FetchError::Malformed(err.to_string()))
    }
}

/// Client for the two geodetic lookup services.
pub struct GeoidHeightService<T: Transport = HttpTransport> {
    transport: T,
    policy: RetryPolicy,
    ngs_url: String,
    vdatum_url: String,
}

impl GeoidHeightService<HttpTransport> {
    pub fn new(config: &ServiceConfig) -> Self {
        Self::with_transport(HttpTransport::new(), RetryPolicy::lookup_default(), config)
    }
}

impl<T: Transport> GeoidHeightService<T> {
    pub fn with_transport(transport: T, policy: RetryPolicy, config: &ServiceConfig) -> Self {
        Self {
            transport,
            policy,
            ngs_url: config.ngs_url.clone(),
            vdatum_url: config.vdatum_url.clone(),
        }
    }

    /// Obtain the height correction for a resolved vertical datum choice.
    ///
    /// A choice of "none" short-circuits to a zero adjustment without any
    /// network call. Everything else is fatal on exhaustion.
    pub fn adjustment(
        &self,
        choice: VerticalDatumChoice,
        lat: f64,
        lon: f64,
        region: &str,
    ) -> Result<GeoidAdjustment> {
        let model = match choice {
            VerticalDatumChoice::None => {
                return Ok(GeoidAdjustment {
                    meters: 0.0,
                    source: AdjustmentSource::NotRequired,
                })
            }
            VerticalDatumChoice::Model(model) => model,
        };

        match model.kind {
            ServiceKind::National => self.national_lookup(model.name, lat, lon),
            ServiceKind::Regional => self.regional_lookup(model.name, lat, lon, region),
        }
    }

    /// Query the national model service, retrying transport and parse
    /// failures a fixed number of times.
    fn national_lookup(&self, model: &str, lat: f64, lon: f64) -> Result<GeoidAdjustment> {
        let url = format!("{}?lat={lat}&lon={lon}&model={model}", self.ngs_url);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                self.policy.pause();
                debug!("geoid height retry {attempt}/{}", self.policy.max_attempts);
            }
            match self.transport.get_json(&url) {
                Ok(body) => match body.get("geoidHeight").and_then(Value::as_f64) {
                    Some(height) => {
                        info!("geoid height for {model}: {height} m");
                        return Ok(GeoidAdjustment {
                            meters: height,
                            source: AdjustmentSource::NationalModel,
                        });
                    }
                    None => {
                        last_error = format!("response carried no geoidHeight field: {body}");
                        warn!("geoid height lookup attempt {attempt} failed: {last_error}");
                    }
                },
                Err(err) => {
                    last_error = err.to_string();
                    warn!("geoid height lookup attempt {attempt} failed: {last_error}");
                }
            }
        }

        Err(anyhow!(
            "geoid height lookup failed after {} attempts (model {model}, lat {lat}, lon {lon}): {last_error}",
            self.policy.max_attempts
        ))
    }

    /// Query the regional datum-transform service.
    ///
    /// An "invalid region" rejection advances to the next candidate region
    /// (requested region first, then the fixed list in order); any other
    /// server-reported error is fatal. Transport and parse failures retry
    /// under the shared policy within the current region.
    fn regional_lookup(
        &self,
        frame: &str,
        lat: f64,
        lon: f64,
        region: &str,
    ) -> Result<GeoidAdjustment> {
        let candidates: Vec<&str> = std::iter::once(region)
            .chain(REGIONS.iter().copied().filter(|r| *r != region))
            .collect();

        for candidate in &candidates {
            match self.regional_lookup_in(frame, lat, lon, candidate)? {
                RegionalOutcome::Height(meters) => {
                    info!("datum transform for {frame} in region {candidate}: {meters} m");
                    return Ok(GeoidAdjustment {
                        meters,
                        source: AdjustmentSource::RegionalTransform,
                    });
                }
                RegionalOutcome::InvalidRegion(message) => {
                    warn!("region {candidate} rejected for {frame}: {message}");
                }
            }
        }

        Err(anyhow!(
            "datum transform failed for every candidate region (frame {frame}, lat {lat}, lon {lon}, tried: {})",
            candidates.join(", ")
        ))
    }

    fn regional_lookup_in(
        &self,
        frame: &str,
        lat: f64,
        lon: f64,
        region: &str,
    ) -> Result<RegionalOutcome> {
        let url = format!(
            "{}?region={region}&s_x={lon}&s_y={lat}&s_h_frame=NAD83_2011&s_v_frame={frame}&t_h_frame=NAD83_2011&t_v_frame=NAD83_2011",
            self.vdatum_url
        );
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                self.policy.pause();
                debug!("datum transform retry {attempt}/{}", self.policy.max_attempts);
            }
            let body = match self.transport.get_json(&url) {
                Ok(body) => body,
                Err(err) => {
                    last_error = err.to_string();
                    warn!("datum transform attempt {attempt} failed: {last_error}");
                    continue;
                }
            };

            if let Some(message) = server_error(&body) {
                if message.to_ascii_lowercase().contains("region") {
                    return Ok(RegionalOutcome::InvalidRegion(message));
                }
                bail!(
                    "datum transform rejected (frame {frame}, region {region}, lat {lat}, lon {lon}): {message}"
                );
            }

            match target_height(&body) {
                Some(meters) => return Ok(RegionalOutcome::Height(meters)),
                None => {
                    last_error = format!("response carried no t_z field: {body}");
                    warn!("datum transform attempt {attempt} failed: {last_error}");
                }
            }
        }

        Err(anyhow!(
            "datum transform failed after {} attempts (frame {frame}, region {region}, lat {lat}, lon {lon}): {last_error}",
            self.policy.max_attempts
        ))
    }
}

enum RegionalOutcome {
    Height(f64),
    InvalidRegion(String),
}

fn server_error(body: &Value) -> Option<String> {
    let code = body.get("errorCode")?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unspecified error");
    Some(format!("{message} (errorCode {code})"))
}

/// The service reports the converted height as `t_z`, historically either a
/// number or a numeric string.
fn target_height(body: &Value) -> Option<f64> {
    let t_z = body.get("t_z")?;
    if let Some(height) = t_z.as_f64() {
        return Some(height);
    }
    t_z.as_str().and_then(|raw| raw.parse().ok())
}
