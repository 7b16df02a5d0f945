//! Server and client framework for the Constrained Application Protocol
//! (CoAP): request routing, reliable `CON` delivery, observation
//! (RFC7641), and datagram/stream transports, built on the `coap-msg`
//! codec.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod observe;
pub mod pool;
pub mod reliability;
pub mod retry;
pub mod router;
pub mod server;
pub mod transport;

pub use client::Client;
pub use config::Config;
pub use error::{Error, What, When};
pub use router::{Attrs, Method};
pub use server::{Builder, Server};

pub use coap_msg::{Code, ContentFormat, Id, Message, Token, Type};
