//! Request routing: pattern compilation, matching with named parameters,
//! and discovery metadata.
//!
//! Patterns are compiled once at registration time into a sequence of
//! literal or `:name` segments (mirroring the segment-at-a-time matching
//! in the teacher's `toad::server::path`, without its `Ap` combinator
//! machinery — this crate targets a plain builder, see Design Note 1).

use std::collections::BTreeMap;
use std::sync::Arc;

use coap_msg::Message;

pub mod discovery;

/// The request method, mirroring the CoAP request codes this crate
/// supports (`0.01`-`0.04`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn from_code(code: coap_msg::Code) -> Option<Self> {
    match code {
      | coap_msg::Code::GET => Some(Method::Get),
      | coap_msg::Code::POST => Some(Method::Post),
      | coap_msg::Code::PUT => Some(Method::Put),
      | coap_msg::Code::DELETE => Some(Method::Delete),
      | _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Param(String),
}

fn compile(pattern: &str) -> Vec<Segment> {
  pattern.split('/')
         .filter(|s| !s.is_empty())
         .map(|s| match s.strip_prefix(':') {
           | Some(name) => Segment::Param(name.to_string()),
           | None => Segment::Literal(s.to_string()),
         })
         .collect()
}

/// Discovery attributes attached to a route, rendered into the
/// `/.well-known/core` link-format document. See RFC6690.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
  pub title: Option<String>,
  pub rt: Vec<String>,
  pub interface: Vec<String>,
  pub content_format: Option<u16>,
  pub size: Option<u64>,
  pub observable: bool,
}

impl Attrs {
  pub fn is_empty(&self) -> bool {
    self.title.is_none() && self.rt.is_empty() && self.interface.is_empty() && self.content_format.is_none() && self.size.is_none() && !self.observable
  }
}

/// A registered request handler. Takes the matched request and returns a
/// result the dispatcher coerces into an outbound message (see
/// `crate::dispatch`). `Arc`'d rather than `Box`'d so a matched handler
/// can be cloned into a worker-pool job without tying it to the route
/// table's lifetime.
pub type Handler = Arc<dyn Fn(&crate::dispatch::RequestContext) -> crate::dispatch::HandlerResult + Send + Sync>;

struct Route {
  method: Method,
  pattern: String,
  segments: Vec<Segment>,
  attrs: Attrs,
  handler: Handler,
}

/// Outcome of matching a path (and method) against the route table.
pub enum Matched<'a> {
  Route { pattern: &'a str, params: BTreeMap<String, String>, handler: &'a Handler },
  MethodNotAllowed,
  NotFound,
}

/// The route table. Registration order is preserved and used to break
/// ties deterministically.
#[derive(Default)]
pub struct Router {
  routes: Vec<Route>,
}

impl Router {
  pub fn new() -> Self {
    Router { routes: Vec::new() }
  }

  /// Register `handler` for `(method, pattern)`. Panics if that pair is
  /// already registered — route tables are built once at startup.
  pub fn register(&mut self, method: Method, pattern: &str, attrs: Attrs, handler: Handler) {
    assert!(!self.routes.iter().any(|r| r.method == method && r.pattern == pattern), "route {pattern:?} already registered for {method:?}");
    self.routes.push(Route { method, pattern: pattern.to_string(), segments: compile(pattern), attrs, handler });
  }

  /// Find the `GET` route bound to `path` with `observable=true`, used by
  /// the watcher and by observe-registration handling.
  pub fn find_observable(&self, path: &str) -> Option<&str> {
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    self.routes
        .iter()
        .find(|r| r.method == Method::Get && r.attrs.observable && segments_match(&r.segments, &path_segs).is_some())
        .map(|r| r.pattern.as_str())
  }

  /// Match `(method, path)` against the route table, in registration
  /// order. A path match with the wrong method yields
  /// [`Matched::MethodNotAllowed`] rather than [`Matched::NotFound`], even
  /// if a later route would match both.
  pub fn match_request(&self, method: Method, path: &str) -> Matched<'_> {
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut path_matched_wrong_method = false;
    for route in &self.routes {
      if let Some(params) = segments_match(&route.segments, &path_segs) {
        if route.method == method {
          return Matched::Route { pattern: &route.pattern, params, handler: &route.handler };
        }
        path_matched_wrong_method = true;
      }
    }

    if path_matched_wrong_method {
      Matched::MethodNotAllowed
    } else {
      Matched::NotFound
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (Method, &str, &Attrs)> {
    self.routes.iter().map(|r| (r.method, r.pattern.as_str(), &r.attrs))
  }
}

fn segments_match(pattern: &[Segment], path: &[&str]) -> Option<BTreeMap<String, String>> {
  if pattern.len() != path.len() {
    return None;
  }

  let mut params = BTreeMap::new();
  for (seg, part) in pattern.iter().zip(path.iter()) {
    match seg {
      | Segment::Literal(lit) if lit == part => {},
      | Segment::Literal(_) => return None,
      | Segment::Param(name) => {
        params.insert(name.clone(), part.to_string());
      },
    }
  }
  Some(params)
}

/// Extract `(method, path)` from an inbound request message, for routing.
pub fn method_and_path(msg: &Message) -> Option<(Method, String)> {
  Method::from_code(msg.code).map(|m| (m, msg.path()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dispatch::{HandlerResult, RequestContext};

  fn noop_handler() -> Handler {
    Arc::new(|_: &RequestContext| HandlerResult::Content(serde_json::Value::Null))
  }

  #[test]
  fn matches_literal_path() {
    let mut r = Router::new();
    r.register(Method::Get, "ping", Attrs::default(), noop_handler());
    assert!(matches!(r.match_request(Method::Get, "ping"), Matched::Route { .. }));
    assert!(matches!(r.match_request(Method::Get, "pong"), Matched::NotFound));
  }

  #[test]
  fn extracts_named_parameter() {
    let mut r = Router::new();
    r.register(Method::Get, "users/:id", Attrs::default(), noop_handler());
    match r.match_request(Method::Get, "users/42") {
      | Matched::Route { params, .. } => assert_eq!(params.get("id"), Some(&"42".to_string())),
      | _ => panic!("expected a match"),
    }
  }

  #[test]
  fn wrong_method_is_method_not_allowed_not_not_found() {
    let mut r = Router::new();
    r.register(Method::Get, "users/:id", Attrs::default(), noop_handler());
    assert!(matches!(r.match_request(Method::Post, "users/42"), Matched::MethodNotAllowed));
  }

  #[test]
  fn registration_order_breaks_ties() {
    let mut r = Router::new();
    r.register(Method::Get, "a/:x", Attrs::default(), Arc::new(|_| HandlerResult::Content(serde_json::json!("first"))));
    r.register(Method::Get, "a/:y", Attrs::default(), Arc::new(|_| HandlerResult::Content(serde_json::json!("second"))));

    match r.match_request(Method::Get, "a/1") {
      | Matched::Route { params, .. } => assert!(params.contains_key("x")),
      | _ => panic!("expected a match"),
    }
  }

  #[test]
  fn find_observable_only_matches_observable_get_routes() {
    let mut r = Router::new();
    r.register(Method::Get, "sensors/temp", Attrs { observable: true, ..Default::default() }, noop_handler());
    r.register(Method::Get, "ping", Attrs::default(), noop_handler());

    assert_eq!(r.find_observable("sensors/temp"), Some("sensors/temp"));
    assert_eq!(r.find_observable("ping"), None);
  }
}
