//! `coap-cli`: a one-shot CoAP client for `coap://host[:port]/path`
//! requests. Exit code communicates outcome: `0` on `2.xx`, `1` on
//! `4.xx`, `2` on `5.xx`, `3` on transport failure or timeout.

use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use coap::Client;
use coap_msg::{ContentFormat, Message};
use log::error;

const DEFAULT_PORT: u16 = 5683;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Method {
  Get,
  Post,
  Put,
  Delete,
}

/// Send a single CoAP request and print the response.
#[derive(Parser)]
#[command(about, version)]
struct Opts {
  /// Server to contact, e.g. `coap://localhost:5683`.
  #[arg(long)]
  server: String,

  #[arg(long, value_enum, default_value = "get")]
  method: Method,

  /// Resource path, without the leading slash (e.g. `sensors/temp`).
  #[arg(long, default_value = "")]
  path: String,

  /// Request body, sent verbatim as the payload for `post`/`put`.
  #[arg(long)]
  data: Option<String>,

  /// Media type of `--data`, e.g. `application/json` (sent as the
  /// Content-Format option on `post`/`put` requests).
  #[arg(long)]
  format: Option<String>,

  #[arg(long, default_value_t = 5)]
  timeout: u64,
}

fn main() -> ExitCode {
  simple_logger::init_with_level(log::Level::Warn).ok();
  let opts = Opts::parse();

  match run(&opts) {
    | Ok(resp) => print_and_classify(&resp),
    | Err(e) => {
      error!("{e}");
      ExitCode::from(3)
    },
  }
}

fn run(opts: &Opts) -> anyhow::Result<Message> {
  let peer = resolve(&opts.server)?;
  let timeout = Duration::from_secs(opts.timeout);
  let client = Client::bind("0.0.0.0:0".parse().unwrap())?;

  let format = opts.format.as_deref().map(|s| ContentFormat::from_human(s).ok_or_else(|| anyhow::anyhow!("unrecognized --format {s}"))).transpose()?;

  let resp = match opts.method {
    | Method::Get => client.get(peer, &opts.path, timeout)?,
    | Method::Post => client.post(peer, &opts.path, opts.data.clone().unwrap_or_default().into_bytes(), format, timeout)?,
    | Method::Put => client.put(peer, &opts.path, opts.data.clone().unwrap_or_default().into_bytes(), format, timeout)?,
    | Method::Delete => client.delete(peer, &opts.path, timeout)?,
  };

  client.shutdown();
  Ok(resp)
}

fn resolve(server: &str) -> anyhow::Result<SocketAddr> {
  let stripped = server.strip_prefix("coap://").unwrap_or(server);
  let with_port = if stripped.contains(':') { stripped.to_string() } else { format!("{stripped}:{DEFAULT_PORT}") };
  with_port.to_socket_addrs()?.next().ok_or_else(|| anyhow::anyhow!("could not resolve {server}"))
}

fn print_and_classify(resp: &Message) -> ExitCode {
  if !resp.payload.is_empty() {
    match serde_json::from_slice::<serde_json::Value>(&resp.payload) {
      | Ok(v) => println!("{} {v}", resp.code),
      | Err(_) => println!("{} {}", resp.code, String::from_utf8_lossy(&resp.payload)),
    }
  } else {
    println!("{}", resp.code);
  }

  match resp.code.class {
    | 4 => ExitCode::from(1),
    | 5 => ExitCode::from(2),
    | _ => ExitCode::from(0),
  }
}
