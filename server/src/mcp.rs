//! Model Context Protocol server.
//!
//! The server speaks JSON-RPC 2.0 and exposes the RMV tools to MCP clients. It can be reached
//! over two transports:
//! * [`transport::stdio`]: newline-delimited messages on stdin and stdout, for clients which
//!   launch the server as a subprocess.
//! * [`transport::http`]: the streamable HTTP transport, for clients which connect over the
//!   network.

pub mod protocol;
pub mod server;
pub mod transport;

pub use server::Server;

/// A server whose tools read the saved responses in `model/test/data`.
#[cfg(test)]
pub(crate) fn fixture_server(profile: rmv_model::tools::Profile) -> Server {
    use rmv_model::{rmv::LocalClient, tools::Toolbox};
    use std::path::Path;
    use std::sync::Arc;

    let data = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("model/test/data");
    Server::new(Toolbox::new(
        Arc::new(LocalClient::open(data)),
        None,
        profile,
    ))
}
