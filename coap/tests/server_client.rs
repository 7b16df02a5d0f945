//! End-to-end tests driving a real `Server` over loopback UDP with the
//! `Client` façade: discovery, a plain request/response round trip, and
//! an observe subscription notified by a writer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coap::router::{Attrs, Method};
use coap::{Builder, Client};

fn start_server(build: impl FnOnce(Builder) -> Builder) -> (Arc<coap::Server>, SocketAddr) {
  let server = Arc::new(build(Builder::new()).build());
  let addr = server.serve_datagram("127.0.0.1:0".parse().unwrap()).expect("bind datagram transport");
  (server, addr)
}

#[test]
fn ping_round_trips_over_real_sockets() {
  let (server, addr) = start_server(|b| b.route(Method::Get, "ping", Attrs::default(), Arc::new(|_| coap::dispatch::HandlerResult::Content(serde_json::json!({"message": "Pong!"})))));

  let client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();
  let resp = client.get(addr, "ping", Duration::from_secs(2)).unwrap();

  assert_eq!(resp.code, coap_msg::Code::CONTENT);
  let body: serde_json::Value = serde_json::from_slice(&resp.payload).unwrap();
  assert_eq!(body["message"], "Pong!");

  client.shutdown();
  server.shutdown();
}

#[test]
fn discovery_document_lists_registered_routes() {
  let (server, addr) = start_server(|b| {
    b.route(Method::Get, "ping", Attrs { rt: vec!["ping".into()], ..Default::default() }, Arc::new(|_| coap::dispatch::HandlerResult::Content(serde_json::Value::Null)))
  });

  let client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();
  let resp = client.get(addr, "well-known/core", Duration::from_secs(2)).unwrap();

  let body = String::from_utf8(resp.payload).unwrap();
  assert!(body.contains("</ping>"));
  assert!(body.contains("rt=\"ping\""));

  client.shutdown();
  server.shutdown();
}

#[test]
fn writer_triggers_observe_notification_end_to_end() {
  let reading = Arc::new(Mutex::new(22.5_f64));
  let reading_for_get = reading.clone();
  let reading_for_put = reading.clone();

  let (server, addr) = start_server(|b| {
    b.observable("sensors/temp", Attrs::default(), Arc::new(move |_| coap::dispatch::HandlerResult::Content(serde_json::json!(*reading_for_get.lock().unwrap())))).route(Method::Put, "sensors/temp", Attrs::default(), Arc::new(move |ctx| {
                 if let Ok(v) = serde_json::from_slice::<f64>(&ctx.payload) {
                   *reading_for_put.lock().unwrap() = v;
                 }
                 coap::dispatch::HandlerResult::changed(serde_json::json!("ok"))
               }))
  });

  let sub_client = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();
  let notified = Arc::new(AtomicU32::new(0));
  let notified2 = notified.clone();
  let _token = sub_client.observe(addr, "sensors/temp", Duration::from_secs(2), move |msg| {
                            if let Ok(v) = serde_json::from_slice::<f64>(&msg.payload) {
                              if v == 30.0 {
                                notified2.fetch_add(1, Ordering::SeqCst);
                              }
                            }
                          })
                          .unwrap();

  let writer = Client::bind("127.0.0.1:0".parse().unwrap()).unwrap();
  let resp = writer
    .put(addr, "sensors/temp", serde_json::to_vec(&30.0f64).unwrap(), Some(coap_msg::ContentFormat::Json), Duration::from_secs(2))
    .unwrap();
  assert_eq!(resp.code, coap_msg::Code::CHANGED);

  std::thread::sleep(Duration::from_millis(300));
  assert_eq!(notified.load(Ordering::SeqCst), 1);

  sub_client.shutdown();
  writer.shutdown();
  server.shutdown();
}

#[test]
fn duplicate_confirmable_request_is_answered_without_reinvoking_handler() {
  let calls = Arc::new(AtomicU32::new(0));
  let calls2 = calls.clone();
  let (server, addr) = start_server(|b| b.route(Method::Get, "count", Attrs::default(), Arc::new(move |_| coap::dispatch::HandlerResult::Content(serde_json::json!(calls2.fetch_add(1, Ordering::SeqCst))))));

  // Send the exact same message-ID twice quickly, as a client retransmit
  // would after a dropped ACK, bypassing `Client` (which would pick a
  // fresh ID) to exercise the exchange-ledger dedup directly.
  let raw = coap::transport::datagram::DatagramTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
  let mut req = coap_msg::Message::new(coap_msg::Type::Con, coap_msg::Code::GET, coap_msg::Id(42), coap_msg::Token(vec![7]));
  req.set_path("count");
  let bytes = req.to_datagram_bytes().unwrap();

  raw.send_to(&bytes, addr).unwrap();
  std::thread::sleep(Duration::from_millis(100));
  raw.send_to(&bytes, addr).unwrap();
  std::thread::sleep(Duration::from_millis(100));

  assert_eq!(calls.load(Ordering::SeqCst), 1);

  server.shutdown();
}
