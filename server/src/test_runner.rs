#![cfg(test)]

//! This module runs test cases defined in `test/cases`.
//!
//! Each test case consists of two files, named in terms of `<name>`, the name of the test case:
//! * `<name>.request.json`: a JSON-RPC message to post to the server
//! * `<name>.json`: the expected JSON-RPC response
//!
//! This runner will start an HTTP server backed by the saved RMV responses in
//! `model/test/data`, post each message and make sure that the response matches the expected
//! response. Before comparing, tool output text which is itself JSON is parsed, so that the
//! expected files can spell it out as a structure.
//!
//! The remaining tests in this module cover the parts of the HTTP transport which are not
//! plain request/response: sessions, event streams, and notifications.

use super::mcp::{fixture_server, transport::http};
use anyhow::Error;
use async_std::task::{sleep, spawn};
use futures::future::join_all;
use portpicker::pick_unused_port;
use rmv_model::tools::Profile;
use serde_json::{json, Value};
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use surf::{http::mime, http::StatusCode, Client};

#[async_std::test]
async fn mcp_api_test_cases() -> Result<(), Error> {
    rmv_model::init_logging();

    // Discover test cases.
    let test_cases = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("test/cases")
        .read_dir()?
        .filter_map(|dirent| {
            let path = dirent.unwrap().path();
            let name = path.file_name()?.to_str()?;
            if name.ends_with(".request.json") {
                Some(TestCase::new(&path).unwrap())
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    assert!(!test_cases.is_empty());

    let client = start_server().await?;
    let results = join_all(test_cases.into_iter().map(|test| test.run(client.clone()))).await;
    for result in &results {
        println!("{}", result);
    }
    if results.iter().any(TestResult::failed) {
        Err(Error::msg("tests failed"))
    } else {
        println!("All test cases passed.");
        Ok(())
    }
}

/// Start an HTTP server and connect a client to it.
async fn start_server() -> Result<Client, Error> {
    let port = pick_unused_port().unwrap();
    let app = http::app(fixture_server(Profile::Transit));
    spawn(async move {
        app.listen(format!("127.0.0.1:{port}")).await.unwrap();
        tracing::warn!("server exited");
    });

    let client: Client = surf::Config::default()
        .set_base_url(format!("http://127.0.0.1:{port}").parse().unwrap())
        .try_into()
        .unwrap();
    // Wait for the server to come up.
    wait_for_server(&client).await?;
    Ok(client)
}

#[derive(Clone, Debug)]
struct TestCase {
    name: OsString,
    request: Value,
    response: Value,
}

impl TestCase {
    fn new(request_path: impl AsRef<Path>) -> Result<Self, Error> {
        let request_path = request_path.as_ref();
        let file_name = request_path.file_name().unwrap().to_string_lossy();
        let name = file_name.trim_end_matches(".request.json");
        let request = serde_json::from_reader(File::open(request_path)?)?;
        let response_path = request_path.with_file_name(format!("{name}.json"));
        let mut response = serde_json::from_reader(File::open(response_path)?)?;
        normalize_response(&mut response);
        Ok(Self {
            name: name.into(),
            request,
            response,
        })
    }

    async fn run(self, client: Client) -> TestResult {
        TestResult {
            name: self.name,
            failure: Self::do_test(client, self.request, self.response).await.err(),
        }
    }

    async fn do_test(client: Client, request: Value, expected_response: Value) -> Result<(), Error> {
        let mut res = post(&client, &request, mime::JSON.essence()).await?;
        if res.status() != StatusCode::Ok {
            return Err(Error::msg(format!(
                "request failed with status {}",
                res.status()
            )));
        }

        let mut response: Value = res
            .body_json()
            .await
            .map_err(|err| Error::msg(format!("cannot parse reponse body as JSON: {err}")))?;
        normalize_response(&mut response);

        if response != expected_response {
            Err(Error::msg(format!(
                "expected response:\n{expected_response}\nactual response:\n{response}"
            )))
        } else {
            Ok(())
        }
    }
}

struct TestResult {
    name: OsString,
    failure: Option<anyhow::Error>,
}

impl TestResult {
    fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl Display for TestResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}...", self.name.to_string_lossy())?;
        if let Some(err) = &self.failure {
            writeln!(f, "FAILED")?;
            write!(f, "{err}")?;
        } else {
            write!(f, "OK")?;
        }
        Ok(())
    }
}

async fn post(client: &Client, message: &Value, accept: &str) -> Result<surf::Response, Error> {
    client
        .post(http::ENDPOINT)
        .header("Accept", accept)
        .body_json(message)
        .map_err(Error::msg)?
        .send()
        .await
        .map_err(Error::msg)
}

async fn wait_for_server(client: &Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        match client.get(http::ENDPOINT).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!("waiting for server to start: {err}");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(Error::msg("timed out waiting for server"))
}

fn normalize_response(res: &mut Value) {
    // Normalize all children.
    if let Some(obj) = res.as_object_mut() {
        for (key, val) in obj.iter_mut() {
            // Tool output is usually a JSON document in a string. Parse it so that it compares
            // structurally.
            if key == "text" {
                if let Some(parsed) = val.as_str().and_then(|text| serde_json::from_str(text).ok())
                {
                    *val = parsed;
                }
            }
            normalize_response(val);
        }
    } else if let Some(arr) = res.as_array_mut() {
        for val in arr {
            normalize_response(val);
        }
    }
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "test-runner", "version": "0.0.0" },
        },
    })
}

#[async_std::test]
async fn http_sessions() -> Result<(), Error> {
    let client = start_server().await?;

    let res = post(&client, &initialize_request(), mime::JSON.essence()).await?;
    assert_eq!(res.status(), StatusCode::Ok);
    let session = res
        .header(http::SESSION_HEADER)
        .expect("initialize starts a session")
        .last()
        .as_str()
        .to_owned();

    // Requests within the session are served.
    let res = client
        .post(http::ENDPOINT)
        .header(http::SESSION_HEADER, session.as_str())
        .body_json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .map_err(Error::msg)?
        .await
        .map_err(Error::msg)?;
    assert_eq!(res.status(), StatusCode::Ok);
    assert!(res.header(http::SESSION_HEADER).is_none());

    // End the session.
    let res = client
        .delete(http::ENDPOINT)
        .header(http::SESSION_HEADER, session.as_str())
        .await
        .map_err(Error::msg)?;
    assert_eq!(res.status(), StatusCode::Ok);

    // The session is gone.
    let res = client
        .post(http::ENDPOINT)
        .header(http::SESSION_HEADER, session.as_str())
        .body_json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }))
        .map_err(Error::msg)?
        .await
        .map_err(Error::msg)?;
    assert_eq!(res.status(), StatusCode::NotFound);

    let res = client
        .delete(http::ENDPOINT)
        .header(http::SESSION_HEADER, session.as_str())
        .await
        .map_err(Error::msg)?;
    assert_eq!(res.status(), StatusCode::NotFound);
    Ok(())
}

#[async_std::test]
async fn http_event_stream() -> Result<(), Error> {
    let client = start_server().await?;
    let call = json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": {
            "name": "search_stations",
            "arguments": { "query": "Dortelweil" },
        },
    });

    let mut res = post(&client, &call, "application/json, text/event-stream").await?;
    assert_eq!(res.status(), StatusCode::Ok);
    assert_eq!(
        res.content_type().map(|mime| mime.essence().to_owned()),
        Some(mime::SSE.essence().to_owned())
    );
    let body = res.body_string().await.map_err(Error::msg)?;
    let events = body
        .split("\n\n")
        .filter_map(|event| event.lines().find_map(|line| line.strip_prefix("data: ")))
        .map(serde_json::from_str::<Value>)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["method"], "notifications/message");
    assert_eq!(events[0]["params"]["data"], "Searching station Dortelweil...");
    assert_eq!(events[1]["id"], 5);
    assert_eq!(events[1]["result"]["isError"], false);

    // Without event streams, the notification is dropped and the response is plain JSON.
    let mut res = post(&client, &call, mime::JSON.essence()).await?;
    assert_eq!(
        res.content_type().map(|mime| mime.essence().to_owned()),
        Some(mime::JSON.essence().to_owned())
    );
    let response: Value = res.body_json().await.map_err(Error::msg)?;
    assert_eq!(response["id"], 5);
    Ok(())
}

#[async_std::test]
async fn http_notifications_and_streams() -> Result<(), Error> {
    let client = start_server().await?;

    let res = post(
        &client,
        &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        mime::JSON.essence(),
    )
    .await?;
    assert_eq!(res.status(), StatusCode::Accepted);

    let res = client
        .get(http::ENDPOINT)
        .header("Accept", mime::SSE.essence())
        .await
        .map_err(Error::msg)?;
    assert_eq!(res.status(), StatusCode::MethodNotAllowed);
    Ok(())
}
