//! TCP transport (RFC8323): an accept loop spawning one reader thread per
//! connection, feeding complete frames (per `coap_msg::frame_len`) to a
//! caller-supplied handler and writing back whatever it returns.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

/// A connection-oriented CoAP transport. One socket is shared by every
/// concurrent outbound request to that peer; inbound responses are
/// disambiguated by token at the dispatch layer, not here.
pub struct StreamTransport {
  listener: TcpListener,
}

/// A write handle for a single accepted (or outbound) connection.
#[derive(Clone)]
pub struct Connection(Arc<Mutex<TcpStream>>);

impl Connection {
  pub fn connect(addr: SocketAddr) -> std::io::Result<Self> {
    Ok(Connection(Arc::new(Mutex::new(TcpStream::connect(addr)?))))
  }

  pub fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
    self.0.lock().unwrap().write_all(bytes)
  }

  pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
    self.0.lock().unwrap().peer_addr()
  }
}

impl StreamTransport {
  pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
    Ok(StreamTransport { listener: TcpListener::bind(addr)? })
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  /// Accept connections on their own thread, spawning a reader thread per
  /// connection. `on_frame` is invoked with each complete frame's bytes
  /// and a `Connection` to reply on; returning `Some(bytes)` writes a
  /// reply immediately.
  pub fn spawn_accept_loop(self, running: Arc<AtomicBool>, on_frame: impl Fn(Vec<u8>, &Connection) -> Option<Vec<u8>> + Send + Sync + 'static) -> std::thread::JoinHandle<()> {
    let on_frame = Arc::new(on_frame);
    std::thread::Builder::new().name("coap-tcp-accept".into())
                                .spawn(move || {
                                  self.listener.set_nonblocking(true).ok();
                                  while running.load(Ordering::Relaxed) {
                                    match self.listener.accept() {
                                      | Ok((stream, peer)) => {
                                        debug!("accepted tcp connection from {peer}");
                                        stream.set_nonblocking(false).ok();
                                        let conn = Connection(Arc::new(Mutex::new(stream.try_clone().expect("clone stream"))));
                                        let on_frame = on_frame.clone();
                                        let running = running.clone();
                                        std::thread::spawn(move || read_loop(stream, conn, running, on_frame));
                                      },
                                      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                                        std::thread::sleep(std::time::Duration::from_millis(50));
                                      },
                                      | Err(e) => {
                                        warn!("tcp accept error: {e}");
                                        std::thread::sleep(std::time::Duration::from_millis(50));
                                      },
                                    }
                                  }
                                })
                                .expect("failed to spawn TCP accept thread")
  }
}

fn read_loop(mut stream: TcpStream, conn: Connection, running: Arc<AtomicBool>, on_frame: Arc<dyn Fn(Vec<u8>, &Connection) -> Option<Vec<u8>> + Send + Sync>) {
  let mut buf = Vec::new();
  let mut tmp = [0u8; 4096];

  while running.load(Ordering::Relaxed) {
    match coap_msg::frame_len(&buf) {
      | Some(need) if buf.len() >= need => {
        let frame: Vec<u8> = buf.drain(..need).collect();
        trace!("read {need} byte frame");
        if let Some(reply) = on_frame(frame, &conn) {
          if conn.send(&reply).is_err() {
            break;
          }
        }
        continue;
      },
      | _ => {},
    }

    match stream.read(&mut tmp) {
      | Ok(0) => break,
      | Ok(n) => buf.extend_from_slice(&tmp[..n]),
      | Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
      | Err(_) => break,
    }
  }
}
