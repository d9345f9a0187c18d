use anyhow::Error;
use clap::{Args, Parser};
use mcp::{transport::Transport, Server};
use rmv_model::{
    init_logging, rmv,
    tools::{Profile, Toolbox},
};
use std::path::{Path, PathBuf};

mod dev;
mod inspect;
mod mcp;
mod test_runner;

/// Serve RMV public transport information to MCP clients.
#[derive(Parser)]
#[clap(name = "rmv-mcp", version)]
enum Command {
    /// Run the MCP server.
    Serve {
        /// How clients connect to the server.
        #[clap(short, long, env = "RMV_MCP_TRANSPORT", default_value = "stdio")]
        transport: Transport,

        /// The address to bind when serving over HTTP.
        #[clap(long, env = "RMV_MCP_HOST", default_value = "0.0.0.0")]
        host: String,

        /// The port to listen on when serving over HTTP.
        #[clap(short, long, env = "RMV_MCP_PORT", default_value = "8000")]
        port: u16,

        #[clap(flatten)]
        server: ServerOptions,
    },
    /// Print the server's name, version, and tools.
    Inspect {
        /// Output format: json or text.
        #[clap(short, long, default_value = "json")]
        format: inspect::Format,

        #[clap(flatten)]
        server: ServerOptions,
    },
    /// Run the server under the MCP Inspector, with the demo tools enabled.
    Dev {
        /// The command used to launch the inspector.
        ///
        /// The server's own command line is appended to it.
        #[clap(long, env = "RMV_MCP_INSPECTOR", default_value = dev::DEFAULT_INSPECTOR)]
        inspector: String,

        #[clap(flatten)]
        rmv: rmv::Options,
    },
}

/// Options for building a server.
#[derive(Clone, Debug, Args)]
struct ServerOptions {
    /// Which tools to offer: transit or demo.
    #[clap(long, env = "RMV_MCP_PROFILE", default_value = "transit")]
    profile: Profile,

    #[clap(flatten)]
    rmv: rmv::Options,
}

impl ServerOptions {
    fn server(&self) -> Result<Server, Error> {
        let backend = self.rmv.connect()?;
        Ok(Server::new(Toolbox::new(
            backend,
            self.rmv.api_key.clone(),
            self.profile,
        )))
    }
}

impl Command {
    async fn run(self) -> Result<(), Error> {
        match self {
            Self::Serve {
                transport,
                host,
                port,
                server,
            } => {
                let server = server.server()?;
                tracing::info!(
                    "starting {} {} with {} tools",
                    server.info().name,
                    server.info().version,
                    server.tools().len()
                );
                match transport {
                    Transport::Stdio => mcp::transport::stdio::serve(&server).await,
                    Transport::Http => mcp::transport::http::serve(server, &host, port).await,
                }
            }
            Self::Inspect { format, server } => {
                let manifest = inspect::Manifest::new(&server.server()?);
                println!("{}", manifest.render(format)?.trim_end());
                Ok(())
            }
            Self::Dev { inspector, rmv } => dev::run(&inspector, &rmv),
        }
    }
}

/// Load variables from a `.env` file into the environment.
///
/// With no `path`, `.env` is looked up in the current directory and its ancestors. Variables
/// which are already set are not overridden. Returns the file that was loaded, if any.
fn load_env(path: Option<&Path>) -> Result<Option<PathBuf>, dotenvy::Error> {
    let res = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_owned()),
        None => dotenvy::dotenv(),
    };
    match res {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    // The environment may configure logging, so load it first.
    let env_file = load_env(None);
    init_logging();
    match env_file {
        Ok(Some(path)) => tracing::info!("loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(err) => tracing::warn!("unable to load .env file: {err}"),
    }
    Command::parse().run().await
}
