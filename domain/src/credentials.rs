use std::fmt::{self, Debug, Formatter};

/// Selects which base URL a [`Credentials`] set is valid against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Environment {
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Mainnet => "https://fapi.binance.com",
            Environment::Testnet => "https://testnet.binancefuture.com",
        }
    }

    pub fn ws_base_url(self) -> &'static str {
        match self {
            Environment::Mainnet => "wss://fstream.binance.com/ws",
            Environment::Testnet => "wss://stream.binancefuture.com/ws",
        }
    }
}

/// API key/secret pair plus the environment they were issued for.
///
/// Immutable after construction: nothing in the gateway mutates credentials once a client is
/// built, and the secret is never exposed through `Debug`.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    environment: Environment,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            environment,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("environment", &self.environment)
            .finish()
    }
}
