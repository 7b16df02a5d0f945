//! UDP transport: one receive loop per bound socket. Framing and
//! dispatch decisions live in `coap::server`/`coap::client`; this module
//! only owns the socket.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};

const MAX_DATAGRAM: usize = 64 * 1024;
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A bound UDP socket shared by inbound receive loop and outbound sends.
pub struct DatagramTransport {
  socket: UdpSocket,
}

impl DatagramTransport {
  pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
    Ok(DatagramTransport { socket })
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  pub fn try_clone(&self) -> std::io::Result<Self> {
    Ok(DatagramTransport { socket: self.socket.try_clone()? })
  }

  pub fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
    self.socket.send_to(bytes, dest)
  }

  /// Spawn the receive loop on its own thread. `on_datagram` is invoked
  /// with each inbound datagram's bytes and sender; it runs on the
  /// receive thread, so it should hand real work off to a worker pool
  /// rather than block.
  pub fn spawn_recv_loop(self: Arc<Self>, running: Arc<AtomicBool>, mut on_datagram: impl FnMut(Vec<u8>, SocketAddr) + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new().name("coap-udp-recv".into())
                                .spawn(move || {
                                  let mut buf = vec![0u8; MAX_DATAGRAM];
                                  while running.load(Ordering::Relaxed) {
                                    match self.socket.recv_from(&mut buf) {
                                      | Ok((n, peer)) => {
                                        trace!("received {n} bytes from {peer}");
                                        on_datagram(buf[..n].to_vec(), peer);
                                      },
                                      | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
                                      | Err(e) => {
                                        warn!("udp recv error: {e}");
                                        continue;
                                      },
                                    }
                                  }
                                })
                                .expect("failed to spawn UDP receive thread")
  }
}
