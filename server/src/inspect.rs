//! Describe the server without running it.

use crate::mcp::{protocol::LATEST_PROTOCOL_VERSION, Server};
use anyhow::Error;
use rmv_model::tools::ToolDescriptor;
use serde::Serialize;
use std::fmt::Write;
use strum::{Display, EnumString};

/// How to print the manifest.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Text,
}

/// Everything a client would learn about the server by initializing a session and listing tools.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub protocol_version: &'static str,
    pub tools: Vec<ToolDescriptor>,
}

impl Manifest {
    pub fn new(server: &Server) -> Self {
        Self {
            name: server.info().name.clone(),
            version: server.info().version.clone(),
            protocol_version: LATEST_PROTOCOL_VERSION,
            tools: server.tools(),
        }
    }

    pub fn render(&self, format: Format) -> Result<String, Error> {
        match format {
            Format::Json => Ok(serde_json::to_string_pretty(self)?),
            Format::Text => {
                let mut out = String::new();
                writeln!(out, "{} {}", self.name, self.version)?;
                writeln!(out, "protocol {}", self.protocol_version)?;
                writeln!(out)?;
                writeln!(out, "Tools:")?;
                for tool in &self.tools {
                    let summary = tool.description.lines().next().unwrap_or_default();
                    writeln!(out, "  {}: {summary}", tool.name)?;
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mcp::fixture_server;
    use rmv_model::tools::Profile;
    use serde_json::Value;

    #[test]
    fn test_json_manifest() {
        let manifest = Manifest::new(&fixture_server(Profile::Demo));
        let json: Value = serde_json::from_str(&manifest.render(Format::Json).unwrap()).unwrap();
        assert_eq!(json["name"], "My Server");
        assert_eq!(json["protocolVersion"], LATEST_PROTOCOL_VERSION);
        assert_eq!(json["tools"].as_array().unwrap().len(), 3);
        assert_eq!(json["tools"][0]["name"], "process_data");
    }

    #[test]
    fn test_text_manifest() {
        let manifest = Manifest::new(&fixture_server(Profile::Transit));
        let text = manifest.render(Format::Text).unwrap();
        assert!(text.starts_with("RMV Transit Info "));
        assert!(text.contains("  search_stations: Search for stations/stops in the RMV network."));
        assert!(text.contains("  get_connections: "));
        assert!(!text.contains("process_data"));
    }
}
