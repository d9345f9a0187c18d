//! The stdio transport.
//!
//! Each message is a single line of JSON. Requests arrive on stdin, and responses and
//! notifications are written to stdout. Nothing else may be written to stdout, so logs go to
//! stderr.

use super::super::server::{Reply, Server};
use anyhow::Error;
use async_std::io::{self, BufRead, BufReader, Write};
use async_std::prelude::*;
use serde::Serialize;

/// Serve MCP on stdin and stdout until stdin is closed.
pub async fn serve(server: &Server) -> Result<(), Error> {
    tracing::info!("serving MCP on stdio");
    run(server, BufReader::new(io::stdin()), io::stdout()).await
}

/// Serve MCP messages read from `input`, writing replies to `output`.
pub async fn run<R, W>(server: &Server, mut input: R, mut output: W) -> Result<(), Error>
where
    R: BufRead + Unpin,
    W: Write + Unpin,
{
    let mut line = vec![];
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            break;
        }

        let reply = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => server.handle_message(text).await,
            Err(err) => Reply::parse_error(err),
        };
        for notification in &reply.notifications {
            write_line(&mut output, notification).await?;
        }
        if let Some(response) = &reply.response {
            write_line(&mut output, response).await?;
        }
    }

    tracing::info!("input closed, shutting down");
    Ok(())
}

async fn write_line<W: Write + Unpin>(
    output: &mut W,
    message: &impl Serialize,
) -> Result<(), Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mcp::fixture_server;
    use rmv_model::tools::Profile;
    use serde_json::{json, Value};

    async fn exchange(input: impl Into<Vec<u8>>) -> Vec<Value> {
        let server = fixture_server(Profile::Transit);
        let mut output = vec![];
        run(&server, io::Cursor::new(input.into()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[async_std::test]
    async fn test_session() {
        let input = [
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05", "capabilities": {} },
            }),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {
                    "name": "get_connections",
                    "arguments": {
                        "origin_id": "3000959",
                        "destination_id": "3004734",
                        "num_trips": 1,
                    },
                },
            }),
        ]
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");

        let output = exchange(input).await;
        assert_eq!(output.len(), 3, "{output:?}");
        assert_eq!(output[0]["id"], 1);
        assert_eq!(output[0]["result"]["protocolVersion"], "2024-11-05");

        // The tool's log message precedes its result.
        assert_eq!(output[1]["method"], "notifications/message");
        assert_eq!(
            output[1]["params"]["data"],
            "Searching Connection from 3000959 to 3004734..."
        );

        assert_eq!(output[2]["id"], 2);
        let text = output[2]["result"]["content"][0]["text"].as_str().unwrap();
        let connections: Value = serde_json::from_str(text).unwrap();
        assert_eq!(connections["count"], 1);
        assert_eq!(connections["origin"], "Bad Vilbel-Dortelweil Bf");
        assert_eq!(connections["destination"], "Darmstadt Hauptbahnhof");
    }

    #[async_std::test]
    async fn test_blank_and_bad_lines() {
        let output =
            exchange("\n   \nnot json\n{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n")
                .await;
        assert_eq!(output.len(), 2);
        assert_eq!(output[0]["error"]["code"], -32700);
        assert_eq!(output[1]["id"], 9);
    }

    #[async_std::test]
    async fn test_invalid_utf8() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#);
        let output = exchange(input).await;
        assert_eq!(output.len(), 2, "{output:?}");
        assert_eq!(output[0]["id"], Value::Null);
        assert_eq!(output[0]["error"]["code"], -32700);
        assert_eq!(output[1]["id"], 3);
        assert_eq!(output[1]["result"], json!({}));
    }
}
