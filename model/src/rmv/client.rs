//! A client for the RMV HAFAS REST API.

use super::{Leg, Rmv, Station, StationQuery, Trip, TripQuery};
use anyhow::Error;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use surf::Url;

/// An RMV API client.
pub struct Client {
    client: surf::Client,
    api_key: Option<String>,
}

impl Client {
    /// Connect to the RMV API at `api_base`.
    ///
    /// Requests fail without contacting the API if `api_key` is [`None`].
    pub fn new(
        mut api_base: Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        // Endpoints are joined onto the base URL, which only keeps the last path segment if it
        // ends with a slash.
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        let client = surf::Config::default()
            .set_base_url(api_base)
            .set_timeout(Some(timeout))
            .try_into()
            .map_err(Error::msg)?;
        Ok(Self { client, api_key })
    }

    fn request<E: Endpoint>(&self) -> Result<Request<E>, Error> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| Error::msg("RMV_API_KEY is not set"))?;
        Ok(Request::new(&self.client, api_key))
    }
}

#[async_trait]
impl Rmv for Client {
    async fn search_stations(&self, query: &StationQuery) -> Result<Option<Vec<Station>>, Error> {
        let res = self
            .request::<LocationList>()?
            .param("input", &query.query)
            .param("maxNo", query.max_results.to_string())
            .param("type", "S")
            .get()
            .await?;
        Ok(res.into_output())
    }

    async fn trips(&self, query: &TripQuery) -> Result<Option<Vec<Trip>>, Error> {
        let now = chrono::Local::now();
        let date = query
            .date
            .clone()
            .unwrap_or_else(|| now.format("%Y-%m-%d").to_string());
        let time = query
            .time
            .clone()
            .unwrap_or_else(|| now.format("%H:%M").to_string());
        let res = self
            .request::<TripList>()?
            .param("originExtId", &query.origin_id)
            .param("destExtId", &query.destination_id)
            .param("date", date)
            .param("time", time)
            .param("numTrips", query.num_trips.to_string())
            .param("searchForArrival", "0")
            .get()
            .await?;
        Ok(res.into_output())
    }
}

/// The body of an HAFAS REST response.
///
/// Each endpoint answers with its own top-level object. The payload we care about is nested
/// under a single key (`stopLocationOrCoordLocation` for `location.name`, `Trip` for `trip`),
/// which is missing altogether when there are no results.
pub(super) trait Endpoint: DeserializeOwned {
    /// The path of this endpoint, relative to the API base URL.
    const NAME: &'static str;

    /// The normalized result extracted from this response.
    type Output;

    /// Extract the normalized result, or [`None`] if the response has no results.
    fn into_output(self) -> Option<Self::Output>;
}

/// An HAFAS response containing data of type `T`.
///
/// Failed requests replace the payload with an error code and a readable message.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum Response<T> {
    Err {
        #[serde(rename = "errorCode")]
        code: String,
        #[serde(rename = "errorText")]
        text: Option<String>,
    },
    Ok(T),
}

impl<T> Response<T> {
    pub(super) fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(data) => Ok(data),
            Self::Err {
                code,
                text: Some(text),
            } => Err(Error::msg(format!("API request failed: {code}: {text}"))),
            Self::Err { code, text: None } => {
                Err(Error::msg(format!("API request failed: {code}")))
            }
        }
    }
}

/// Response from the `location.name` endpoint.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct LocationList {
    #[serde(rename = "stopLocationOrCoordLocation")]
    locations: Option<Vec<Location>>,
}

impl LocationList {
    /// Keep only the first `max` locations, as the API would with `maxNo`.
    pub(super) fn truncate(&mut self, max: usize) {
        if let Some(locations) = &mut self.locations {
            locations.truncate(max);
        }
    }
}

impl Endpoint for LocationList {
    const NAME: &'static str = "location.name";
    type Output = Vec<Station>;

    fn into_output(self) -> Option<Vec<Station>> {
        let locations = self.locations?;
        Some(
            locations
                .into_iter()
                .filter_map(|location| match location.stop {
                    Some(stop) => Some(stop.into()),
                    None => {
                        // Addresses and points of interest come back as `CoordLocation`s, which
                        // can't be used to plan a trip.
                        tracing::debug!("skipping location which is not a stop");
                        None
                    }
                })
                .collect(),
        )
    }
}

/// An entry in a location search result.
///
/// Exactly one of `StopLocation` or `CoordLocation` is present in each entry.
#[derive(Clone, Debug, Deserialize)]
struct Location {
    #[serde(rename = "StopLocation")]
    stop: Option<StopLocation>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopLocation {
    ext_id: Option<String>,
    name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    product_at_stop: Vec<Value>,
}

impl From<StopLocation> for Station {
    fn from(stop: StopLocation) -> Self {
        Self {
            id: stop.ext_id,
            name: stop.name,
            latitude: stop.lat,
            longitude: stop.lon,
            products: stop.product_at_stop,
        }
    }
}

/// Response from the `trip` endpoint.
#[derive(Clone, Debug, Deserialize)]
pub(super) struct TripList {
    #[serde(rename = "Trip")]
    trips: Option<Vec<TripEntry>>,
}

impl TripList {
    /// Keep only the first `max` trips, as the API would with `numTrips`.
    pub(super) fn truncate(&mut self, max: usize) {
        if let Some(trips) = &mut self.trips {
            trips.truncate(max);
        }
    }
}

impl Endpoint for TripList {
    const NAME: &'static str = "trip";
    type Output = Vec<Trip>;

    fn into_output(self) -> Option<Vec<Trip>> {
        Some(self.trips?.into_iter().map(Trip::from).collect())
    }
}

#[derive(Clone, Debug, Deserialize)]
struct TripEntry {
    duration: Option<String>,
    #[serde(default)]
    chg: u32,
    #[serde(rename = "LegList", default)]
    leg_list: LegList,
}

impl From<TripEntry> for Trip {
    fn from(trip: TripEntry) -> Self {
        Self {
            duration: trip.duration,
            transfers: trip.chg,
            legs: trip.leg_list.legs.into_iter().map(Leg::from).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct LegList {
    #[serde(rename = "Leg", default)]
    legs: Vec<LegEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct LegEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    direction: Option<String>,
    #[serde(rename = "Origin", default)]
    origin: Stop,
    #[serde(rename = "Destination", default)]
    destination: Stop,
}

/// The origin or destination of a leg.
#[derive(Clone, Debug, Default, Deserialize)]
struct Stop {
    name: Option<String>,
    time: Option<String>,
    track: Option<String>,
}

impl From<LegEntry> for Leg {
    fn from(leg: LegEntry) -> Self {
        Self {
            kind: leg.kind,
            name: leg.name,
            direction: leg.direction,
            origin: leg.origin.name,
            destination: leg.destination.name,
            departure: leg.origin.time,
            arrival: leg.destination.time,
            platform: leg.origin.track,
        }
    }
}

struct Request<E> {
    builder: surf::RequestBuilder,
    params: HashMap<String, String>,
    _endpoint: std::marker::PhantomData<fn() -> E>,
}

impl<E: Endpoint> Request<E> {
    fn new(client: &surf::Client, api_key: String) -> Self {
        let mut params = HashMap::default();
        params.insert("accessId".into(), api_key);
        params.insert("format".into(), "json".into());

        Self {
            builder: client.get(E::NAME),
            params,
            _endpoint: Default::default(),
        }
    }

    fn param(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(param.into(), value.into());
        self
    }

    async fn get(self) -> Result<E, Error> {
        let logged = self
            .params
            .iter()
            .filter(|(param, _)| *param != "accessId")
            .collect::<HashMap<_, _>>();
        tracing::info!(endpoint = E::NAME, params = ?logged, "RMV request");

        let mut res = self
            .builder
            .query(&self.params)
            .map_err(Error::msg)?
            .send()
            .await
            .map_err(|err| Error::msg(format!("API request failed: {err}")))?;
        let status = res.status();
        let body = res
            .body_string()
            .await
            .map_err(|err| Error::msg(format!("API request failed: {err}")))?;

        if !status.is_success() {
            // HAFAS usually explains what went wrong; fall back to the bare status if it didn't.
            if let Ok(Response::<Value>::Err { code, text }) = serde_json::from_str(&body) {
                return Response::<E>::Err { code, text }.into_result();
            }
            return Err(Error::msg(format!(
                "API request failed: {} {}",
                status,
                status.canonical_reason()
            )));
        }

        serde_json::from_str::<Response<E>>(&body)
            .map_err(|err| Error::msg(format!("API request failed: malformed response: {err}")))?
            .into_result()
    }
}
