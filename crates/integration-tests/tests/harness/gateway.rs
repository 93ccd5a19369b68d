//! Test harness that runs a real gateway on an ephemeral port

use std::net::SocketAddr;

use plexus_config::{SystemConfig, UserConfig};
use plexus_server::{Gateway, GatewayOptions};
use tokio_util::sync::CancellationToken;

/// A running gateway plus a client to talk to it
pub struct TestGateway {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl TestGateway {
    /// Assemble from a TOML user config and start serving
    pub async fn start(user_toml: &str) -> anyhow::Result<Self> {
        let user: UserConfig = toml::from_str(user_toml)?;
        let gateway = Gateway::new(&user, SystemConfig::builtin(), GatewayOptions::default())?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        tokio::spawn(plexus_server::serve(gateway, listener, shutdown.clone()));

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
