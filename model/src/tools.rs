//! Tools offered to MCP clients.
//!
//! Each tool takes JSON arguments and produces text for the client. The text is either a JSON
//! document, a short message when there is nothing to report, or `Error: <reason>` when the
//! upstream API could not answer.

use crate::rmv::{Connections, Rmv, StationList, StationQuery, TripQuery};
use anyhow::Error;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use strum::{Display, EnumString};

/// Which set of tools the server advertises.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Profile {
    /// The transit tools only.
    #[default]
    Transit,
    /// The transit tools plus `process_data`, for experimenting with clients.
    Demo,
}

impl Profile {
    /// The name the server reports to clients.
    pub fn server_name(&self) -> &'static str {
        match self {
            Self::Transit => "RMV Transit Info",
            Self::Demo => "My Server",
        }
    }

    /// The tools in this profile, in the order they are listed.
    pub fn tools(&self) -> &'static [ToolName] {
        match self {
            Self::Transit => &[ToolName::SearchStations, ToolName::GetConnections],
            Self::Demo => &[
                ToolName::ProcessData,
                ToolName::SearchStations,
                ToolName::GetConnections,
            ],
        }
    }
}

/// The name of a tool.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ToolName {
    ProcessData,
    SearchStations,
    GetConnections,
}

impl ToolName {
    /// Describe this tool for `tools/list`.
    pub fn descriptor(&self) -> ToolDescriptor {
        let (description, input_schema) = match self {
            Self::ProcessData => (
                "Process data on the server",
                json!({
                    "type": "object",
                    "properties": {
                        "input": { "type": "string" },
                    },
                    "required": ["input"],
                }),
            ),
            Self::SearchStations => (
                "Search for stations/stops in the RMV network.\n\n\
                 Returns JSON with matching stations including IDs and coordinates.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search term (station name, address, or POI)",
                        },
                        "max_results": {
                            "type": "integer",
                            "minimum": 0,
                            "default": 10,
                            "description": "Maximum number of results to return",
                        },
                    },
                    "required": ["query"],
                }),
            ),
            Self::GetConnections => (
                "Get journey connections between two stations.\n\n\
                 Returns JSON with journey options including transfers and duration.",
                json!({
                    "type": "object",
                    "properties": {
                        "origin_id": {
                            "type": "string",
                            "description": "RMV station ID of origin (use search_stations)",
                        },
                        "destination_id": {
                            "type": "string",
                            "description": "RMV station ID of destination",
                        },
                        "num_trips": {
                            "type": "integer",
                            "minimum": 0,
                            "default": 3,
                            "description": "Number of trip options to return",
                        },
                        "departure_time": {
                            "type": ["string", "null"],
                            "default": null,
                            "description": "Departure time in HH:MM format (default: now)",
                        },
                    },
                    "required": ["origin_id", "destination_id"],
                }),
            ),
        };
        ToolDescriptor {
            name: self.to_string(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool as advertised to clients.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

/// The result of running a tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    /// Whether the tool failed to do its job.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Error: {reason}"),
            is_error: true,
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => Self::text(text),
            Err(err) => Self::error(err),
        }
    }
}

/// Severity of a message logged to the client.
///
/// These are the syslog levels used by MCP, from least to most severe.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumString,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

/// A message logged to the client while a tool runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub logger: String,
    pub data: Value,
}

/// State scoped to a single tool call.
///
/// Tools use the context to send log messages to the client. Messages below the client's chosen
/// level are dropped.
#[derive(Debug, Default)]
pub struct Context {
    min_level: LogLevel,
    messages: Vec<LogMessage>,
}

impl Context {
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            messages: vec![],
        }
    }

    /// Log a message to the client.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if level < self.min_level {
            return;
        }
        self.messages.push(LogMessage {
            level,
            logger: "rmv".into(),
            data: Value::String(message.into()),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message)
    }

    /// The messages logged so far, in order.
    pub fn into_messages(self) -> Vec<LogMessage> {
        self.messages
    }
}

#[derive(Debug, Deserialize)]
struct ProcessDataArgs {
    input: String,
}

#[derive(Debug, Deserialize)]
struct SearchStationsArgs {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: u32,
}

fn default_max_results() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct GetConnectionsArgs {
    origin_id: String,
    destination_id: String,
    #[serde(default = "default_num_trips")]
    num_trips: u32,
    #[serde(default)]
    departure_time: Option<String>,
}

fn default_num_trips() -> u32 {
    3
}

/// The tools of one [`Profile`], bound to an RMV backend.
pub struct Toolbox {
    rmv: Arc<dyn Rmv>,
    api_key: Option<String>,
    profile: Profile,
}

impl Toolbox {
    pub fn new(rmv: Arc<dyn Rmv>, api_key: Option<String>, profile: Profile) -> Self {
        Self {
            rmv,
            api_key,
            profile,
        }
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Describe every tool in this toolbox.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.profile
            .tools()
            .iter()
            .map(ToolName::descriptor)
            .collect()
    }

    /// Run the tool called `name`.
    ///
    /// Fails if there is no such tool or `args` do not match its schema. Failures of the tool
    /// itself are reported in the [`ToolOutput`].
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &mut Context,
    ) -> Result<ToolOutput, Error> {
        let tool = name
            .parse::<ToolName>()
            .ok()
            .filter(|tool| self.profile.tools().contains(tool))
            .ok_or_else(|| Error::msg(format!("unknown tool: {name}")))?;
        let args = if args.is_null() { json!({}) } else { args };
        tracing::debug!(%tool, %args, "calling tool");

        Ok(match tool {
            ToolName::ProcessData => {
                let args: ProcessDataArgs = parse_args(tool, args)?;
                self.process_data(&args.input)
            }
            ToolName::SearchStations => {
                let args: SearchStationsArgs = parse_args(tool, args)?;
                let query = StationQuery {
                    query: args.query,
                    max_results: args.max_results,
                };
                self.search_stations(&query, ctx).await
            }
            ToolName::GetConnections => {
                let args: GetConnectionsArgs = parse_args(tool, args)?;
                let mut query = TripQuery::new(args.origin_id, args.destination_id);
                query.num_trips = args.num_trips;
                query.time = args.departure_time;
                self.get_connections(&query, ctx).await
            }
        })
    }

    /// Search for stations/stops in the RMV network.
    pub async fn search_stations(&self, query: &StationQuery, ctx: &mut Context) -> ToolOutput {
        ctx.info(format!("Searching station {}...", query.query));
        match self.rmv.search_stations(query).await {
            Ok(Some(stations)) => {
                ctx.debug(format!("found {} stations", stations.len()));
                ToolOutput::json(&StationList::from(stations))
            }
            Ok(None) => ToolOutput::text("No stations found"),
            Err(err) => {
                tracing::warn!("station search failed: {err}");
                ToolOutput::error(err)
            }
        }
    }

    /// Get journey connections between two stations.
    pub async fn get_connections(&self, query: &TripQuery, ctx: &mut Context) -> ToolOutput {
        if let Some(time) = &query.time {
            if NaiveTime::parse_from_str(time, "%H:%M").is_err() {
                return ToolOutput::error(format!(
                    "departure_time must be in HH:MM format, got '{time}'"
                ));
            }
        }

        ctx.info(format!(
            "Searching Connection from {} to {}...",
            query.origin_id, query.destination_id
        ));
        match self.rmv.trips(query).await {
            Ok(Some(trips)) => ToolOutput::json(&Connections::from(trips)),
            Ok(None) => ToolOutput::text("No connections found"),
            Err(err) => {
                tracing::warn!("trip search failed: {err}");
                ToolOutput::error(err)
            }
        }
    }

    /// Echo `input`, or a prefix of the API key if it looks like a structured key.
    pub fn process_data(&self, input: &str) -> ToolOutput {
        match self.api_key.as_deref().and_then(|key| key.split_once('-')) {
            Some((prefix, _)) => ToolOutput::text(format!("Processed with key: {prefix}")),
            None => ToolOutput::text(format!("Processed: {input}")),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, Error> {
    serde_json::from_value(args)
        .map_err(|err| Error::msg(format!("invalid arguments for {tool}: {err}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rmv::{Leg, Station, Trip};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A fake RMV backend with canned results, which records the queries it receives.
    #[derive(Default)]
    struct Fake {
        stations: Option<Vec<Station>>,
        trips: Option<Vec<Trip>>,
        fail: bool,
        station_queries: Mutex<Vec<StationQuery>>,
        trip_queries: Mutex<Vec<TripQuery>>,
    }

    #[async_trait]
    impl Rmv for Fake {
        async fn search_stations(
            &self,
            query: &StationQuery,
        ) -> Result<Option<Vec<Station>>, Error> {
            self.station_queries.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(Error::msg("API request failed: timed out"));
            }
            Ok(self.stations.clone())
        }

        async fn trips(&self, query: &TripQuery) -> Result<Option<Vec<Trip>>, Error> {
            self.trip_queries.lock().unwrap().push(query.clone());
            if self.fail {
                return Err(Error::msg("API request failed: timed out"));
            }
            Ok(self.trips.clone())
        }
    }

    fn toolbox(fake: Fake, profile: Profile) -> (Toolbox, Arc<Fake>) {
        let fake = Arc::new(fake);
        (Toolbox::new(fake.clone(), None, profile), fake)
    }

    fn station(id: &str, name: &str) -> Station {
        Station {
            id: Some(id.into()),
            name: Some(name.into()),
            latitude: Some(50.0),
            longitude: Some(8.7),
            products: vec![],
        }
    }

    #[test]
    fn test_profiles() {
        let (tools, _) = toolbox(Fake::default(), Profile::Transit);
        let names = tools
            .list()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["search_stations", "get_connections"]);

        let (tools, _) = toolbox(Fake::default(), Profile::Demo);
        let names = tools
            .list()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, ["process_data", "search_stations", "get_connections"]);

        assert_eq!("demo".parse::<Profile>().unwrap(), Profile::Demo);
        assert_eq!(Profile::Transit.server_name(), "RMV Transit Info");
    }

    #[async_std::test]
    async fn test_search_stations() {
        let fake = Fake {
            stations: Some(vec![station("3000959", "Bad Vilbel-Dortelweil Bf")]),
            ..Default::default()
        };
        let (tools, fake) = toolbox(fake, Profile::Transit);
        let mut ctx = Context::default();

        let output = tools
            .call(
                "search_stations",
                json!({ "query": "Dortelweil", "max_results": 1 }),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(!output.is_error);
        let list: StationList = serde_json::from_str(&output.text).unwrap();
        assert_eq!(list.count, 1);
        assert_eq!(list.stations[0].id.as_deref(), Some("3000959"));
        assert_eq!(
            fake.station_queries.lock().unwrap()[0],
            StationQuery {
                query: "Dortelweil".into(),
                max_results: 1,
            }
        );

        let messages = ctx.into_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, LogLevel::Info);
        assert_eq!(messages[0].data, "Searching station Dortelweil...");
    }

    #[async_std::test]
    async fn test_search_stations_default_limit() {
        let (tools, fake) = toolbox(Fake::default(), Profile::Transit);
        let output = tools
            .call(
                "search_stations",
                json!({ "query": "Nowhere" }),
                &mut Context::default(),
            )
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::text("No stations found"));
        assert_eq!(fake.station_queries.lock().unwrap()[0].max_results, 10);
    }

    #[async_std::test]
    async fn test_upstream_failure() {
        let fake = Fake {
            fail: true,
            ..Default::default()
        };
        let (tools, _) = toolbox(fake, Profile::Transit);
        let output = tools
            .call(
                "get_connections",
                json!({ "origin_id": "1", "destination_id": "2" }),
                &mut Context::default(),
            )
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.text, "Error: API request failed: timed out");
    }

    #[async_std::test]
    async fn test_get_connections() {
        let leg = |origin: &str, destination: &str| Leg {
            kind: Some("JNY".into()),
            name: Some("S6".into()),
            direction: None,
            origin: Some(origin.into()),
            destination: Some(destination.into()),
            departure: Some("08:14:00".into()),
            arrival: None,
            platform: None,
        };
        let fake = Fake {
            trips: Some(vec![Trip {
                duration: Some("PT55M".into()),
                transfers: 1,
                legs: vec![leg("Dortelweil", "Frankfurt"), leg("Frankfurt", "Darmstadt")],
            }]),
            ..Default::default()
        };
        let (tools, fake) = toolbox(fake, Profile::Transit);
        let mut ctx = Context::new(LogLevel::Warning);

        let output = tools
            .call(
                "get_connections",
                json!({
                    "origin_id": "3000959",
                    "destination_id": "3004734",
                    "departure_time": "08:10",
                }),
                &mut ctx,
            )
            .await
            .unwrap();
        let connections: Value = serde_json::from_str(&output.text).unwrap();
        assert_eq!(connections["origin"], "Dortelweil");
        assert_eq!(connections["destination"], "Darmstadt");
        assert_eq!(connections["count"], 1);
        assert_eq!(connections["trips"][0]["legs"][0]["type"], "JNY");

        let queries = fake.trip_queries.lock().unwrap();
        let query = &queries[0];
        assert_eq!(query.num_trips, 3);
        assert_eq!(query.time.as_deref(), Some("08:10"));

        // Info messages are below the client's level.
        assert!(ctx.into_messages().is_empty());
    }

    #[async_std::test]
    async fn test_invalid_departure_time() {
        let (tools, fake) = toolbox(Fake::default(), Profile::Transit);
        for time in ["8 o'clock", "25:00", "08:10:00"] {
            let output = tools
                .call(
                    "get_connections",
                    json!({
                        "origin_id": "1",
                        "destination_id": "2",
                        "departure_time": time,
                    }),
                    &mut Context::default(),
                )
                .await
                .unwrap();
            assert!(output.is_error, "{time}");
        }
        assert!(fake.trip_queries.lock().unwrap().is_empty());
    }

    #[async_std::test]
    async fn test_no_connections() {
        let (tools, _) = toolbox(Fake::default(), Profile::Transit);
        let output = tools
            .call(
                "get_connections",
                json!({ "origin_id": "1", "destination_id": "2", "departure_time": null }),
                &mut Context::default(),
            )
            .await
            .unwrap();
        assert_eq!(output, ToolOutput::text("No connections found"));
    }

    #[async_std::test]
    async fn test_bad_calls() {
        let (tools, _) = toolbox(Fake::default(), Profile::Transit);
        let mut ctx = Context::default();

        // `process_data` is only offered in the demo profile.
        let err = tools
            .call("process_data", json!({ "input": "x" }), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: process_data");

        tools
            .call("search_stations", Value::Null, &mut ctx)
            .await
            .unwrap_err();
        tools
            .call(
                "search_stations",
                json!({ "query": "x", "max_results": -1 }),
                &mut ctx,
            )
            .await
            .unwrap_err();
    }

    #[test]
    fn test_process_data() {
        let rmv: Arc<dyn Rmv> = Arc::new(Fake::default());

        let tools = Toolbox::new(rmv.clone(), Some("abc-123-xyz".into()), Profile::Demo);
        assert_eq!(
            tools.process_data("hello").text,
            "Processed with key: abc"
        );

        let tools = Toolbox::new(rmv.clone(), Some("abc123".into()), Profile::Demo);
        assert_eq!(tools.process_data("hello").text, "Processed: hello");

        let tools = Toolbox::new(rmv, None, Profile::Demo);
        assert_eq!(tools.process_data("hello").text, "Processed: hello");
    }
}
