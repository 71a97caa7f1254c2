pub mod client;
pub mod transport;
pub mod wire;

pub use client::RestClient;
pub use transport::{HttpTransport, HyperTransport, RawResponse, TransportError};
