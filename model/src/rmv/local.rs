//! An RMV client which reads from the local file system instead of the RMV API.

use super::{
    client::{Endpoint, LocationList, Response, TripList},
    Rmv, Station, StationQuery, Trip, TripQuery,
};
use anyhow::Error;
use async_trait::async_trait;
use std::path::PathBuf;

/// An RMV client which reads from the local file system instead of the RMV API.
///
/// The directory holds one saved API response per endpoint, named after the endpoint:
///
/// ```text
/// DIR/
///     location.name.json
///     trip.json
/// ```
///
/// The same response is returned for every query, limited to the requested number of results.
pub struct LocalClient {
    root: PathBuf,
}

impl LocalClient {
    /// Open a directory of saved RMV responses.
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    async fn load<E: Endpoint>(&self) -> Result<E, Error> {
        let path = self.root.join(format!("{}.json", E::NAME));
        tracing::debug!("reading saved response {}", path.display());
        let body = async_std::fs::read_to_string(&path)
            .await
            .map_err(|err| Error::msg(format!("unable to read {}: {err}", path.display())))?;
        serde_json::from_str::<Response<E>>(&body)
            .map_err(|err| Error::msg(format!("file {} is malformed: {err}", path.display())))?
            .into_result()
    }
}

#[async_trait]
impl Rmv for LocalClient {
    async fn search_stations(&self, query: &StationQuery) -> Result<Option<Vec<Station>>, Error> {
        let mut res = self.load::<LocationList>().await?;
        res.truncate(query.max_results as usize);
        Ok(res.into_output())
    }

    async fn trips(&self, query: &TripQuery) -> Result<Option<Vec<Trip>>, Error> {
        let mut res = self.load::<TripList>().await?;
        res.truncate(query.num_trips as usize);
        Ok(res.into_output())
    }
}
