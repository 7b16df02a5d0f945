//! Request/response and observe-subscription façade over the reliability
//! engine and the datagram transport.
//!
//! One [`Client`] owns a bound UDP socket, a background receive loop that
//! demultiplexes inbound datagrams by `(peer, message-id)` for pending
//! requests and by token for active subscriptions, and a reliability tick
//! that retransmits unacknowledged `CON` requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use coap_msg::{Code, ContentFormat, Id, Message, Token, Type};
use log::{debug, trace, warn};

use crate::config::Config;
use crate::error::{Error, What, When};
use crate::reliability::{Reliability, TickResult};
use crate::transport::datagram::DatagramTransport;

enum Awaiting {
  Response(Message),
  Failed,
}

struct Subscription {
  last_seq: Option<u32>,
  callback: Arc<dyn Fn(Message) + Send + Sync>,
}

/// A CoAP client: one socket, one reliability engine, background recv and
/// retransmit loops.
pub struct Client {
  transport: Arc<DatagramTransport>,
  reliability: Arc<Reliability>,
  running: Arc<AtomicBool>,
  pending: Arc<Mutex<HashMap<(SocketAddr, Id), SyncSender<Awaiting>>>>,
  subscriptions: Arc<Mutex<HashMap<(SocketAddr, Token), Subscription>>>,
  next_id: AtomicU16,
  config: Config,
  threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Client {
  pub fn bind(local_addr: SocketAddr) -> std::io::Result<Arc<Self>> {
    Self::bind_with_config(local_addr, Config::default())
  }

  pub fn bind_with_config(local_addr: SocketAddr, config: Config) -> std::io::Result<Arc<Self>> {
    let transport = Arc::new(DatagramTransport::bind(local_addr)?);
    let client = Arc::new(Client {
      transport,
      reliability: Arc::new(Reliability::new(&config)),
      running: Arc::new(AtomicBool::new(true)),
      pending: Arc::new(Mutex::new(HashMap::new())),
      subscriptions: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU16::new(1),
      config,
      threads: Mutex::new(Vec::new()),
    });

    client.spawn_recv_loop();
    client.spawn_reliability_tick();
    Ok(client)
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.transport.local_addr()
  }

  fn fresh_id(&self) -> Id {
    Id(self.next_id.fetch_add(1, Ordering::Relaxed))
  }

  fn spawn_recv_loop(self: &Arc<Self>) {
    let this = self.clone();
    let handle = self.transport.clone().spawn_recv_loop(self.running.clone(), move |bytes, peer| {
                   this.handle_datagram(&bytes, peer);
                 });
    self.threads.lock().unwrap().push(handle);
  }

  fn spawn_reliability_tick(self: &Arc<Self>) {
    let this = self.clone();
    let running = self.running.clone();
    let interval = self.config.reliability_tick;
    let handle = std::thread::Builder::new().name("coap-client-tick".into())
                                             .spawn(move || {
                                               while running.load(Ordering::Relaxed) {
                                                 std::thread::sleep(interval);
                                                 let now = Instant::now();
                                                 for (key, result) in this.reliability.tick(now) {
                                                   match result {
                                                     | TickResult::Retransmit { bytes, dest } => {
                                                       if let Err(e) = this.transport.send_to(&bytes, dest) {
                                                         warn!("client retransmit to {dest} failed: {e}");
                                                       }
                                                     },
                                                     | TickResult::Failed => {
                                                       if let Some(tx) = this.pending.lock().unwrap().remove(&key) {
                                                         let _ = tx.send(Awaiting::Failed);
                                                       }
                                                     },
                                                   }
                                                 }
                                               }
                                             })
                                             .expect("failed to spawn client reliability tick thread");
    self.threads.lock().unwrap().push(handle);
  }

  fn handle_datagram(&self, bytes: &[u8], peer: SocketAddr) {
    let msg = match Message::from_datagram_bytes(bytes) {
      | Ok(m) => m,
      | Err(e) => {
        debug!("dropping malformed datagram from {peer}: {e}");
        return;
      },
    };

    if msg.ty == Type::Reset {
      self.reliability.acknowledge(peer, msg.id);
      self.subscriptions.lock().unwrap().remove(&(peer, msg.token.clone()));
      return;
    }

    if let Some(tx) = self.pending.lock().unwrap().remove(&(peer, msg.id)) {
      self.reliability.acknowledge(peer, msg.id);
      let _ = tx.send(Awaiting::Response(msg));
      return;
    }

    // Not a direct reply; maybe an async notification for a subscription.
    let mut subs = self.subscriptions.lock().unwrap();
    if let Some(sub) = subs.get_mut(&(peer, msg.token.clone())) {
      let seq = msg.observe();
      let accept = match (sub.last_seq, seq) {
        | (None, _) => true,
        | (Some(last), Some(candidate)) => coap_msg::opt::observe::is_newer(last, candidate, 0),
        | (Some(_), None) => true,
      };
      if accept {
        if let Some(candidate) = seq {
          sub.last_seq = Some(candidate);
        }
        trace!("delivering notification seq={seq:?} to subscriber {peer}");
        let cb = sub.callback.clone();
        drop(subs);
        cb(msg);
      } else {
        debug!("dropping out-of-order notification from {peer}");
      }
    }
  }

  /// Send `msg` to `peer`, tracking it for retransmit if `CON`, and block
  /// for the matching response up to `timeout`.
  pub fn request(&self, peer: SocketAddr, mut msg: Message, timeout: Duration) -> Result<Message, Error> {
    let id = self.fresh_id();
    msg.id = id;

    let (tx, rx) = sync_channel(1);
    self.pending.lock().unwrap().insert((peer, id), tx);

    let bytes = msg.to_datagram_bytes().map_err(|e| Error::new(What::BadOption(e.to_string()), When::Encoding))?;
    self.transport.send_to(&bytes, peer).map_err(Error::from)?;

    if msg.ty == Type::Con {
      self.reliability.track(peer, id, bytes, self.config.msg.con.unacked_retry_strategy, self.config.msg.con.max_attempts, Instant::now());
    }

    let result = rx.recv_timeout(timeout);
    self.pending.lock().unwrap().remove(&(peer, id));
    self.reliability.acknowledge(peer, id);

    match result {
      | Ok(Awaiting::Response(m)) => Ok(m),
      | Ok(Awaiting::Failed) => Err(Error::new(What::TransmitFail, When::Transmitting)),
      | Err(RecvTimeoutError::Timeout) => Err(Error::new(What::Timeout, When::Transmitting)),
      | Err(RecvTimeoutError::Disconnected) => Err(Error::new(What::TransmitFail, When::Transmitting)),
    }
  }

  pub fn get(&self, peer: SocketAddr, path: &str, timeout: Duration) -> Result<Message, Error> {
    let mut msg = Message::new(Type::Con, Code::GET, Id(0), fresh_token());
    msg.set_path(path);
    self.request(peer, msg, timeout)
  }

  pub fn post(&self, peer: SocketAddr, path: &str, body: Vec<u8>, format: Option<ContentFormat>, timeout: Duration) -> Result<Message, Error> {
    self.write(peer, Code::POST, path, body, format, timeout)
  }

  pub fn put(&self, peer: SocketAddr, path: &str, body: Vec<u8>, format: Option<ContentFormat>, timeout: Duration) -> Result<Message, Error> {
    self.write(peer, Code::PUT, path, body, format, timeout)
  }

  pub fn delete(&self, peer: SocketAddr, path: &str, timeout: Duration) -> Result<Message, Error> {
    let mut msg = Message::new(Type::Con, Code::DELETE, Id(0), fresh_token());
    msg.set_path(path);
    self.request(peer, msg, timeout)
  }

  fn write(&self, peer: SocketAddr, code: Code, path: &str, body: Vec<u8>, format: Option<ContentFormat>, timeout: Duration) -> Result<Message, Error> {
    let mut msg = Message::new(Type::Con, code, Id(0), fresh_token());
    msg.set_path(path);
    if let Some(format) = format {
      msg.set_content_format(format);
    }
    msg.payload = body;
    self.request(peer, msg, timeout)
  }

  /// Subscribe to `path` on `peer` (RFC7641): sends a `GET` with
  /// `Observe=0`, registers `callback` for every subsequent in-order
  /// notification carrying the same token, and returns that token (used
  /// later to cancel).
  pub fn observe(&self, peer: SocketAddr, path: &str, timeout: Duration, callback: impl Fn(Message) + Send + Sync + 'static) -> Result<Token, Error> {
    let token = fresh_token();
    let mut msg = Message::new(Type::Con, Code::GET, Id(0), token.clone());
    msg.set_path(path);
    msg.set_observe(0);

    self.subscriptions.lock().unwrap().insert((peer, token.clone()), Subscription { last_seq: None, callback: Arc::new(callback) });

    match self.request(peer, msg, timeout) {
      | Ok(resp) => {
        if let Some(seq) = resp.observe() {
          if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(&(peer, token.clone())) {
            sub.last_seq = Some(seq);
          }
        }
        Ok(token)
      },
      | Err(e) => {
        self.subscriptions.lock().unwrap().remove(&(peer, token));
        Err(e)
      },
    }
  }

  /// Cancel a subscription: sends `GET` with `Observe=1` and stops
  /// delivering notifications for `token` regardless of the response.
  pub fn cancel_observe(&self, peer: SocketAddr, path: &str, token: Token, timeout: Duration) -> Result<Message, Error> {
    self.subscriptions.lock().unwrap().remove(&(peer, token.clone()));
    let mut msg = Message::new(Type::Con, Code::GET, Id(0), token);
    msg.set_path(path);
    msg.set_observe(1);
    self.request(peer, msg, timeout)
  }

  pub fn shutdown(&self) {
    self.running.store(false, Ordering::Relaxed);
    for handle in self.threads.lock().unwrap().drain(..) {
      let _ = handle.join();
    }
  }
}

fn fresh_token() -> Token {
  use rand::RngCore;
  let mut rng = rand::thread_rng();
  Token::random(&mut || rng.next_u64())
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicU32;

  use coap_msg::ContentFormat;

  use super::*;

  fn respond(server: &DatagramTransport, to: &Message, peer: SocketAddr, code: Code, observe: Option<u32>, payload: &[u8]) {
    let mut resp = Message::new(if to.ty == Type::Con { Type::Ack } else { Type::Non }, code, to.id, to.token.clone());
    if let Some(seq) = observe {
      resp.set_observe(seq);
    }
    resp.set_content_format(ContentFormat::Json);
    resp.payload = payload.to_vec();
    server.send_to(&resp.to_datagram_bytes().unwrap(), peer).unwrap();
  }

  #[test]
  fn request_resolves_on_matching_response() {
    let server = DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = server.local_addr().unwrap();
    let client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let server = Arc::new(server);
    let running = Arc::new(AtomicBool::new(true));
    let client_addr_holder: Arc<Mutex<Option<SocketAddr>>> = Arc::new(Mutex::new(None));
    let holder = client_addr_holder.clone();
    let server_for_loop = server.clone();
    let _h = server.clone().spawn_recv_loop(running.clone(), move |bytes, peer| {
      *holder.lock().unwrap() = Some(peer);
      let req = Message::from_datagram_bytes(&bytes).unwrap();
      respond(&server_for_loop, &req, peer, Code::CONTENT, None, b"\"pong\"");
    });

    let resp = client.get(server_addr, "ping", Duration::from_secs(2)).unwrap();
    assert_eq!(resp.code, Code::CONTENT);
    assert_eq!(resp.payload, b"\"pong\"");

    running.store(false, Ordering::Relaxed);
    client.shutdown();
  }

  #[test]
  fn observe_drops_out_of_order_notifications() {
    let server = Arc::new(DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap());
    let server_addr = server.local_addr().unwrap();
    let client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let server_for_loop = server.clone();
    let _h = server.clone().spawn_recv_loop(running.clone(), move |bytes, peer| {
      let req = Message::from_datagram_bytes(&bytes).unwrap();
      respond(&server_for_loop, &req, peer, Code::CONTENT, Some(5), b"22.5");
    });

    let seen = Arc::new(AtomicU32::new(0));
    let seen2 = seen.clone();
    let token = client.observe(server_addr, "sensors/temp", Duration::from_secs(2), move |_msg| {
                         seen2.fetch_add(1, Ordering::SeqCst);
                       })
                      .unwrap();

    // Simulate the server sending notifications out of order: seq 6 then stale seq 4.
    let mut n1 = Message::new(Type::Non, Code::CONTENT, Id(0), token.clone());
    n1.set_observe(6);
    n1.payload = b"23.0".to_vec();
    server.send_to(&n1.to_datagram_bytes().unwrap(), client.local_addr().unwrap()).unwrap();

    std::thread::sleep(Duration::from_millis(100));

    let mut n2 = Message::new(Type::Non, Code::CONTENT, Id(0), token);
    n2.set_observe(4);
    n2.payload = b"stale".to_vec();
    server.send_to(&n2.to_datagram_bytes().unwrap(), client.local_addr().unwrap()).unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    running.store(false, Ordering::Relaxed);
    client.shutdown();
  }

  #[test]
  fn request_times_out_against_a_silent_peer() {
    let client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let mut config = Config::default();
    config.msg.con.max_attempts = crate::retry::Attempts(1);
    config.msg.con.unacked_retry_strategy = crate::retry::Strategy::Delay { min: Duration::from_millis(20), max: Duration::from_millis(20) };

    let mut msg = Message::new(Type::Non, Code::GET, Id(0), fresh_token());
    msg.set_path("nope");
    let err = client.request(dead, msg, Duration::from_millis(100)).unwrap_err();
    assert!(matches!(err.what, What::Timeout));

    client.shutdown();
  }
}
