//! Server builder and runtime: wires the router, reliability engine,
//! observation registry, and worker pool to the datagram and stream
//! transports.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use coap_msg::{Code, ContentFormat, Message, Type};
use log::{debug, info, warn};

use crate::config::Config;
use crate::dispatch;
use crate::observe::{watcher, Registry};
use crate::pool::Pool;
use crate::reliability::{Reliability, TickResult};
use crate::router::{discovery, Attrs, Handler, Method, Router};
use crate::transport::datagram::DatagramTransport;
use crate::transport::stream::StreamTransport;

const WELL_KNOWN_CORE: &str = "well-known/core";

/// Builds a [`Server`] by registering routes against a router value — the
/// plain-builder replacement for the distilled handler DSL.
pub struct Builder {
  router: Router,
  config: Config,
  discovery_enabled: bool,
}

impl Builder {
  pub fn new() -> Self {
    Builder { router: Router::new(), config: Config::default(), discovery_enabled: true }
  }

  pub fn config(mut self, config: Config) -> Self {
    self.config = config;
    self
  }

  pub fn disable_discovery(mut self) -> Self {
    self.discovery_enabled = false;
    self
  }

  pub fn route(mut self, method: Method, pattern: &str, attrs: Attrs, handler: Handler) -> Self {
    self.router.register(method, pattern, attrs, handler);
    self
  }

  /// Register a `GET` route whose resource can be observed (RFC7641).
  pub fn observable(mut self, pattern: &str, mut attrs: Attrs, handler: Handler) -> Self {
    attrs.observable = true;
    self.router.register(Method::Get, pattern, attrs, handler);
    self
  }

  pub fn build(mut self) -> Server {
    if self.discovery_enabled {
      let doc = discovery::render(&self.router);
      self.router.register(Method::Get, WELL_KNOWN_CORE, Attrs::default(), Arc::new(move |_| dispatch::HandlerResult::Status { code: Code::CONTENT, body: doc.clone().into_bytes() }));
    }

    Server {
      router: Arc::new(self.router),
      pool: Arc::new(Pool::new(self.config.worker_pool_size)),
      reliability: Arc::new(Reliability::new(&self.config)),
      observe: Arc::new(Mutex::new(Registry::new())),
      config: self.config,
      running: Arc::new(AtomicBool::new(true)),
      datagram: Mutex::new(None),
      threads: Mutex::new(Vec::new()),
    }
  }
}

impl Default for Builder {
  fn default() -> Self {
    Builder::new()
  }
}

/// A running (or not-yet-bound) server: shared state plus whichever
/// transports have been started against it.
pub struct Server {
  router: Arc<Router>,
  pool: Arc<Pool>,
  reliability: Arc<Reliability>,
  observe: Arc<Mutex<Registry>>,
  config: Config,
  running: Arc<AtomicBool>,
  /// Set once `serve_datagram` binds a socket. Notifications (writer-
  /// triggered or from the watcher) go out over this if present.
  datagram: Mutex<Option<Arc<DatagramTransport>>>,
  threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Server {
  /// Bind a UDP socket at `addr` and start serving requests on it, plus
  /// the reliability tick and (if any observable routes exist) the
  /// watcher tick.
  pub fn serve_datagram(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let transport = Arc::new(DatagramTransport::bind(addr)?);
    let bound = transport.local_addr()?;
    info!("listening for CoAP/UDP on {bound}");
    *self.datagram.lock().unwrap() = Some(transport.clone());

    let this = self.clone();
    let handle = transport.clone().spawn_recv_loop(self.running.clone(), move |bytes, peer| {
                   this.handle_datagram(&bytes, peer);
                 });
    self.threads.lock().unwrap().push(handle);

    self.spawn_reliability_tick();
    self.spawn_watcher_tick();

    Ok(bound)
  }

  /// Bind a TCP listener at `addr` and start accepting stream connections.
  pub fn serve_stream(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let transport = StreamTransport::bind(addr)?;
    let bound = transport.local_addr()?;
    info!("listening for CoAP/TCP on {bound}");

    let this = self.clone();
    let handle = transport.spawn_accept_loop(self.running.clone(), move |frame, conn| {
                   let peer = conn.peer_addr().ok()?;
                   let msg = Message::from_stream_bytes(&frame).ok()?;
                   let resp = this.handle_request(&msg, peer);
                   resp.to_stream_bytes().ok()
                 });
    self.threads.lock().unwrap().push(handle);

    Ok(bound)
  }

  fn spawn_reliability_tick(self: &Arc<Self>) {
    let this = self.clone();
    let running = self.running.clone();
    let interval = self.config.reliability_tick;
    let handle = std::thread::Builder::new().name("coap-reliability-tick".into())
                                             .spawn(move || {
                                               while running.load(Ordering::Relaxed) {
                                                 std::thread::sleep(interval);
                                                 let now = Instant::now();
                                                 for (_, result) in this.reliability.tick(now) {
                                                   if let TickResult::Retransmit { bytes, dest } = result {
                                                     this.send_datagram(&bytes, dest);
                                                   }
                                                 }
                                                 this.reliability.expire_exchanges(now);
                                               }
                                             })
                                             .expect("failed to spawn reliability tick thread");
    self.threads.lock().unwrap().push(handle);
  }

  fn spawn_watcher_tick(self: &Arc<Self>) {
    if !self.router.iter().any(|(_, _, attrs)| attrs.observable) {
      return;
    }

    let this = self.clone();
    let handle = watcher::spawn(self.router.clone(), self.observe.clone(), self.config.watcher_interval, self.running.clone(), move |peer, msg| {
      this.send_datagram(&msg.to_datagram_bytes().unwrap_or_default(), peer);
    });
    self.threads.lock().unwrap().push(handle);
  }

  fn send_datagram(&self, bytes: &[u8], dest: SocketAddr) {
    if let Some(transport) = self.datagram.lock().unwrap().as_ref() {
      if let Err(e) = transport.send_to(bytes, dest) {
        warn!("send to {dest} failed: {e}");
      }
    }
  }

  fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) {
    let msg = match Message::from_datagram_bytes(bytes) {
      | Ok(m) => m,
      | Err(e) => {
        debug!("dropping malformed datagram from {peer}: {e}");
        return;
      },
    };

    match msg.code.kind() {
      | coap_msg::CodeKind::Empty if msg.ty == Type::Ack || msg.ty == Type::Reset => {
        self.reliability.acknowledge(peer, msg.id);
        if msg.ty == Type::Reset {
          self.observe.lock().unwrap().deregister_peer_token(peer, &msg.token);
        }
      },
      | coap_msg::CodeKind::Request => {
        if msg.ty == Type::Con {
          if let Some(cached) = self.reliability.cached_response(peer, msg.id, Instant::now()) {
            self.send_datagram(&cached, peer);
            return;
          }
        }

        let resp = self.handle_request(&msg, peer);
        if let Ok(bytes) = resp.to_datagram_bytes() {
          if msg.ty == Type::Con {
            self.reliability.remember_exchange(peer, msg.id, bytes.clone(), Instant::now());
          }
          self.send_datagram(&bytes, peer);
        }
      },
      | coap_msg::CodeKind::Response => {
        self.reliability.acknowledge(peer, msg.id);
      },
      | coap_msg::CodeKind::Empty => {},
    }
  }

  fn handle_request(&self, msg: &Message, peer: SocketAddr) -> Message {
    let Some((method, path)) = crate::router::method_and_path(msg) else {
      let ty = if msg.ty == Type::Con { Type::Ack } else { Type::Non };
      return Message::new(ty, Code::BAD_REQUEST, msg.id, msg.token.clone());
    };

    let is_observable_get = method == Method::Get && self.router.find_observable(&path).is_some();
    if is_observable_get {
      match msg.observe() {
        | Some(0) => self.observe.lock().unwrap().register(&path, peer, msg.token.clone()),
        | Some(1) => self.observe.lock().unwrap().deregister(&path, peer, &msg.token),
        | _ => {},
      }
    }

    let is_writer = matches!(method, Method::Put | Method::Post | Method::Delete);
    let mut resp = dispatch::dispatch(&self.router, &self.pool, msg, peer);

    if is_observable_get && msg.observe() == Some(0) {
      if let Some(seq) = self.observe.lock().unwrap().current_seq(&path, peer, &msg.token) {
        resp.set_observe(seq);
      }
    }

    if is_writer && self.router.find_observable(&path).is_some() {
      let fmt = resp.content_format().unwrap_or(ContentFormat::Json);
      let notifications = self.observe.lock().unwrap().notify(&path, &resp.payload, fmt, false);
      for (peer, msg) in notifications {
        if let Ok(bytes) = msg.to_datagram_bytes() {
          self.send_datagram(&bytes, peer);
        }
      }
    }

    resp
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn router(&self) -> &Router {
    &self.router
  }

  /// Emit a notification for `path` out of band — e.g. from a background
  /// task that isn't itself a handler invocation. Requires a bound
  /// datagram transport; a no-op otherwise.
  pub fn notify(&self, path: &str, value: impl serde::Serialize) {
    let payload = serde_json::to_vec(&value).unwrap_or_default();
    let notifications = self.observe.lock().unwrap().notify(path, &payload, ContentFormat::Json, false);
    for (peer, msg) in notifications {
      if let Ok(bytes) = msg.to_datagram_bytes() {
        self.send_datagram(&bytes, peer);
      }
    }
  }

  /// Stop all loops and join their threads. Drains the worker pool too.
  pub fn shutdown(&self) {
    self.running.store(false, Ordering::Relaxed);
    for handle in self.threads.lock().unwrap().drain(..) {
      let _ = handle.join();
    }
    self.pool.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use coap_msg::{Id, Token};

  use super::*;
  use crate::dispatch::HandlerResult;

  #[test]
  fn builder_registers_well_known_core_by_default() {
    let server = Arc::new(Builder::new().route(Method::Get, "ping", Attrs { rt: vec!["ping".into()], ..Default::default() }, Arc::new(|_| HandlerResult::Content(serde_json::Value::Null)))
                                         .build());

    assert!(matches!(server.router().match_request(Method::Get, WELL_KNOWN_CORE), crate::router::Matched::Route { .. }));
  }

  #[test]
  fn ping_handler_replies_with_content() {
    let server = Arc::new(Builder::new().route(Method::Get, "ping", Attrs::default(), Arc::new(|_| HandlerResult::Content(serde_json::json!({"message": "Pong!"}))))
                                         .build());

    let mut req = Message::new(Type::Con, Code::GET, Id(5), Token(vec![2]));
    req.set_path("ping");

    let resp = server.handle_request(&req, "127.0.0.1:1".parse().unwrap());
    assert_eq!(resp.code, Code::CONTENT);
  }

  #[test]
  fn observe_registration_stamps_initial_sequence() {
    let server = Arc::new(Builder::new().observable("sensors/temp", Attrs::default(), Arc::new(|_| HandlerResult::Content(serde_json::json!(22.5))))
                                         .build());

    let mut req = Message::new(Type::Con, Code::GET, Id(1), Token(vec![9]));
    req.set_path("sensors/temp");
    req.set_observe(0);

    let resp = server.handle_request(&req, "127.0.0.1:9".parse().unwrap());
    assert!(resp.observe().is_some());
  }

  #[test]
  fn writer_triggers_notification_to_observers() {
    let server = Arc::new(Builder::new().observable("sensors/temp", Attrs::default(), Arc::new(|_| HandlerResult::Content(serde_json::json!(22.5))))
                                         .route(Method::Put, "sensors/temp", Attrs::default(), Arc::new(|_| HandlerResult::changed(serde_json::json!(23.0))))
                                         .build());

    let mut get_req = Message::new(Type::Con, Code::GET, Id(1), Token(vec![9]));
    get_req.set_path("sensors/temp");
    get_req.set_observe(0);
    server.handle_request(&get_req, "127.0.0.1:9".parse().unwrap());
    assert_eq!(server.observe.lock().unwrap().subscriber_count("sensors/temp"), 1);

    let mut put_req = Message::new(Type::Con, Code::PUT, Id(2), Token(vec![1]));
    put_req.set_path("sensors/temp");
    let resp = server.handle_request(&put_req, "127.0.0.1:1".parse().unwrap());
    assert_eq!(resp.code, Code::CHANGED);
  }
}
