//! Binds an inbound request to a route, builds the handler's request
//! context, submits the job to a worker pool, and coerces the handler's
//! return value into an outbound message.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use coap_msg::{Code, ContentFormat, Message, OptionMap, Type};
use log::{debug, error, warn};

use crate::pool::Pool;
use crate::router::{Matched, Method, Router};

/// Everything a handler needs to answer a request.
pub struct RequestContext {
  pub method: Method,
  pub path: String,
  pub params: BTreeMap<String, String>,
  pub query: Vec<String>,
  pub content_format: Option<ContentFormat>,
  pub payload: Vec<u8>,
  pub opts: OptionMap,
  pub peer: SocketAddr,
}

/// What a handler produced, before wire coercion.
pub enum HandlerResult {
  /// Encoded as `2.05 Content`, `application/json`.
  Content(serde_json::Value),
  /// A specific status code with a pre-encoded body.
  Status { code: Code, body: Vec<u8> },
  /// A fully-formed outbound message, passed through untouched.
  Message(Box<Message>),
  /// A halt: unwinds the handler and produces this status/body directly.
  Halt { code: Code, body: Vec<u8> },
}

impl HandlerResult {
  pub fn created(body: impl serde::Serialize) -> Self {
    HandlerResult::Status { code: Code::CREATED, body: serde_json::to_vec(&body).unwrap_or_default() }
  }

  pub fn changed(body: impl serde::Serialize) -> Self {
    HandlerResult::Status { code: Code::CHANGED, body: serde_json::to_vec(&body).unwrap_or_default() }
  }

  pub fn deleted() -> Self {
    HandlerResult::Status { code: Code::DELETED, body: Vec::new() }
  }

  pub fn valid() -> Self {
    HandlerResult::Status { code: Code::VALID, body: Vec::new() }
  }

  pub fn halt(code: Code, body: impl Into<Vec<u8>>) -> Self {
    HandlerResult::Halt { code, body: body.into() }
  }
}

/// Resolve `request` against `router`, returning the outbound message to
/// send in reply (never `None` — every path produces a response, per the
/// error-handling surfacing rule that handler failures never propagate to
/// the accept/receive loop).
pub fn dispatch(router: &Router, pool: &Pool, request: &Message, peer: SocketAddr) -> Message {
  let Some((method, path)) = crate::router::method_and_path(request) else {
    warn!("request code {} is not a valid method", request.code);
    return error_response(request, Code::BAD_REQUEST);
  };

  match router.match_request(method, &path) {
    | Matched::NotFound => {
      debug!("no route for {method:?} {path}");
      error_response(request, Code::NOT_FOUND)
    },
    | Matched::MethodNotAllowed => {
      debug!("route {path} does not allow {method:?}");
      error_response(request, Code::METHOD_NOT_ALLOWED)
    },
    | Matched::Route { params, handler, .. } => {
      let ctx = RequestContext {
        method,
        path: path.clone(),
        params,
        query: request.query(),
        content_format: request.content_format(),
        payload: request.payload.clone(),
        opts: request.opts.clone(),
        peer,
      };

      let handler = handler.clone();
      let result = pool.run(move || handler(&ctx));
      match result {
        | Ok(r) => coerce(request, r),
        | Err(e) => {
          error!("handler for {path} failed: {e}");
          error_response(request, Code::INTERNAL_SERVER_ERROR)
        },
      }
    },
  }
}

fn coerce(request: &Message, result: HandlerResult) -> Message {
  let mut resp = response_shell(request);
  match result {
    | HandlerResult::Content(v) => {
      resp.code = Code::CONTENT;
      resp.set_content_format(ContentFormat::Json);
      resp.payload = serde_json::to_vec(&v).unwrap_or_default();
    },
    | HandlerResult::Status { code, body } => {
      resp.code = code;
      if !body.is_empty() {
        resp.set_content_format(ContentFormat::Json);
      }
      resp.payload = body;
    },
    | HandlerResult::Message(m) => return *m,
    | HandlerResult::Halt { code, body } => {
      resp.code = code;
      resp.payload = body;
    },
  }
  resp
}

fn response_shell(request: &Message) -> Message {
  let ty = if request.ty == Type::Con { Type::Ack } else { Type::Non };
  Message::new(ty, Code::CONTENT, request.id, request.token.clone())
}

fn error_response(request: &Message, code: Code) -> Message {
  let mut resp = response_shell(request);
  resp.code = code;
  resp
}
