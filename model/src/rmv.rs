//! Facilities for pulling timetable data from the RMV Open Data API.

use anyhow::Error;
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use surf::Url;

mod client;
mod local;

pub use client::Client;
pub use local::LocalClient;

/// The public endpoint of the RMV HAFAS REST API.
pub const DEFAULT_API_BASE: &str = "https://www.rmv.de/hapi/";

/// An RMV client.
#[async_trait]
pub trait Rmv: Send + Sync {
    /// Search for stations matching a free-text query.
    ///
    /// Returns [`None`] if the API reports no matching locations at all, as opposed to an empty
    /// list of stations (which happens when every match is an address or point of interest).
    async fn search_stations(&self, query: &StationQuery) -> Result<Option<Vec<Station>>, Error>;

    /// Plan journeys between two stations.
    ///
    /// Returns [`None`] if the API does not report any trips.
    async fn trips(&self, query: &TripQuery) -> Result<Option<Vec<Trip>>, Error>;
}

/// Options for connecting to RMV.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// The RMV API access ID.
    #[clap(short = 'k', long, env = "RMV_API_KEY")]
    pub api_key: Option<String>,

    /// Base URL of the RMV HAFAS REST API.
    #[clap(long, env = "RMV_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: Url,

    /// Timeout for API requests, in seconds.
    #[clap(long, env = "RMV_TIMEOUT", default_value = "30")]
    pub timeout: u64,

    /// Serve canned API responses from DIR instead of calling the live API.
    ///
    /// This should be a directory containing `location.name.json` and `trip.json`.
    #[clap(long, env = "RMV_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Options {
    /// Connect to the configured RMV backend.
    pub fn connect(&self) -> Result<Arc<dyn Rmv>, Error> {
        if let Some(dir) = &self.data_dir {
            tracing::info!("reading RMV data from {}", dir.display());
            return Ok(Arc::new(LocalClient::open(dir.clone())));
        }
        if self.api_key.is_none() {
            tracing::warn!("RMV_API_KEY is not set, live API requests will fail");
        }
        Ok(Arc::new(Client::new(
            self.api_base.clone(),
            self.api_key.clone(),
            Duration::from_secs(self.timeout),
        )?))
    }
}

/// Parameters for a station search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationQuery {
    /// Search term (station name, address, or POI).
    pub query: String,
    /// Maximum number of locations the API should return.
    pub max_results: u32,
}

impl StationQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 10,
        }
    }
}

/// Parameters for a journey search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripQuery {
    /// External ID of the origin station.
    pub origin_id: String,
    /// External ID of the destination station.
    pub destination_id: String,
    /// Number of trip options to request.
    pub num_trips: u32,
    /// Departure date, `YYYY-MM-DD`. Defaults to today.
    pub date: Option<String>,
    /// Departure time, `HH:MM`. Defaults to now.
    pub time: Option<String>,
}

impl TripQuery {
    pub fn new(origin_id: impl Into<String>, destination_id: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            destination_id: destination_id.into(),
            num_trips: 3,
            date: None,
            time: None,
        }
    }
}

/// A stop in the RMV network.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Station {
    /// The external station ID, usable as the origin or destination of a [`TripQuery`].
    pub id: Option<String>,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// The lines serving this stop, exactly as reported by HAFAS.
    pub products: Vec<Value>,
}

/// One journey option between two stations.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Trip {
    /// Total travel time as an ISO 8601 duration (e.g. `PT55M`).
    pub duration: Option<String>,
    /// Number of changes between vehicles.
    pub transfers: u32,
    pub legs: Vec<Leg>,
}

/// A single ride or walk within a [`Trip`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Leg {
    /// The HAFAS leg type, such as `JNY` for a ride or `WALK` for a footpath.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// The line name, such as `S6`.
    pub name: Option<String>,
    pub direction: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    /// The departure platform at the origin.
    pub platform: Option<String>,
}

/// The result of a station search, as presented to tool clients.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StationList {
    pub stations: Vec<Station>,
    pub count: usize,
}

impl From<Vec<Station>> for StationList {
    fn from(stations: Vec<Station>) -> Self {
        Self {
            count: stations.len(),
            stations,
        }
    }
}

/// The result of a journey search, as presented to tool clients.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Connections {
    /// Where the first trip starts.
    pub origin: Option<String>,
    /// Where the first trip ends.
    pub destination: Option<String>,
    pub trips: Vec<Trip>,
    pub count: usize,
}

impl From<Vec<Trip>> for Connections {
    fn from(trips: Vec<Trip>) -> Self {
        let first = trips.first();
        let origin = first
            .and_then(|trip| trip.legs.first())
            .and_then(|leg| leg.origin.clone());
        let destination = first
            .and_then(|trip| trip.legs.last())
            .and_then(|leg| leg.destination.clone());
        Self {
            origin,
            destination,
            count: trips.len(),
            trips,
        }
    }
}
