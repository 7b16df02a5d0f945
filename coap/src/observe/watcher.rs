//! Polling scheduler for observable resources whose handlers don't push
//! notifications themselves: re-invokes the handler at a fixed interval,
//! hashes the result, and only notifies subscribers when it changed.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coap_msg::{ContentFormat, Message};
use log::trace;

use crate::dispatch::RequestContext;
use crate::observe::Registry;
use crate::router::{Handler, Router};

/// One tick of the watcher: re-run every observable handler and collect
/// the notifications that should go out as a result.
pub fn tick(router: &Router, registry: &Mutex<Registry>, interval_peer: SocketAddr) -> Vec<(SocketAddr, Message)> {
  let mut out = Vec::new();

  for (_, pattern, attrs) in router.iter() {
    if !attrs.observable {
      continue;
    }
    let Some(handler) = find_handler(router, pattern) else { continue };

    trace!("watcher polling {pattern}");
    let ctx = fake_context(pattern, interval_peer);
    let result = handler(&ctx);

    if let crate::dispatch::HandlerResult::Content(value) = result {
      let payload = serde_json::to_vec(&value).unwrap_or_default();
      let mut reg = registry.lock().unwrap();
      out.extend(reg.notify(pattern, &payload, ContentFormat::Json, true));
    }
  }

  out
}

fn find_handler<'a>(router: &'a Router, pattern: &str) -> Option<&'a Handler> {
  match router.match_request(crate::router::Method::Get, pattern) {
    | crate::router::Matched::Route { handler, .. } => Some(handler),
    | _ => None,
  }
}

fn fake_context(path: &str, peer: SocketAddr) -> RequestContext {
  RequestContext {
    method: crate::router::Method::Get,
    path: path.to_string(),
    params: Default::default(),
    query: Vec::new(),
    content_format: None,
    payload: Vec::new(),
    opts: Default::default(),
    peer,
  }
}

/// Spawn the watcher loop on its own thread, running until `router`/
/// `registry` are dropped is not possible (they're shared); instead this
/// returns a `JoinHandle` the caller stops via the shared `running` flag.
pub fn spawn(router: Arc<Router>, registry: Arc<Mutex<Registry>>, interval: Duration, running: Arc<std::sync::atomic::AtomicBool>, sink: impl Fn(SocketAddr, Message) + Send + 'static) -> std::thread::JoinHandle<()> {
  std::thread::Builder::new().name("coap-watcher".into())
                              .spawn(move || {
                                let fake_peer: SocketAddr = "0.0.0.0:0".parse().unwrap();
                                while running.load(std::sync::atomic::Ordering::Relaxed) {
                                  std::thread::sleep(interval);
                                  for (peer, msg) in tick(&router, &registry, fake_peer) {
                                    sink(peer, msg);
                                  }
                                }
                              })
                              .expect("failed to spawn watcher thread")
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex as StdMutex;

  use coap_msg::Token;

  use super::*;
  use crate::dispatch::HandlerResult;
  use crate::router::Attrs;

  #[test]
  fn tick_notifies_subscribers_of_changed_observable() {
    let mut router = Router::new();
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let calls2 = calls.clone();
    router.register(crate::router::Method::Get, "sensors/temp", Attrs { observable: true, ..Default::default() }, std::sync::Arc::new(move |_: &RequestContext| {
             let n = calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
             HandlerResult::Content(serde_json::json!(20 + n))
           }));

    let registry = StdMutex::new(Registry::new());
    registry.lock().unwrap().register("sensors/temp", "127.0.0.1:1".parse().unwrap(), Token(vec![1]));

    let peer: SocketAddr = "0.0.0.0:0".parse().unwrap();
    let first = tick(&router, &registry, peer);
    let second = tick(&router, &registry, peer);

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
  }
}
