//! Transports connecting clients to a [`Server`](super::Server).

use strum::{Display, EnumString};

pub mod http;
pub mod stdio;

/// How clients reach the server.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin and stdout.
    #[default]
    Stdio,
    /// Streamable HTTP.
    Http,
}
