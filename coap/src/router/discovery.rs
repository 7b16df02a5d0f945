//! Renders the `/.well-known/core` link-format document (RFC6690).

use std::fmt::Write as _;

use super::Router;

/// Build the link-format body for every route with non-empty discovery
/// attributes. Each route appears once, in registration order.
pub fn render(router: &Router) -> String {
  let mut out = String::new();
  let mut first = true;

  for (_, pattern, attrs) in router.iter() {
    if attrs.is_empty() {
      continue;
    }

    if !first {
      out.push(',');
    }
    first = false;

    write!(out, "</{pattern}>").ok();

    if let Some(title) = &attrs.title {
      write!(out, ";title=\"{title}\"").ok();
    }
    if !attrs.rt.is_empty() {
      write!(out, ";rt=\"{}\"", attrs.rt.join(" ")).ok();
    }
    if !attrs.interface.is_empty() {
      write!(out, ";if=\"{}\"", attrs.interface.join(" ")).ok();
    }
    if let Some(ct) = attrs.content_format {
      write!(out, ";ct={ct}").ok();
    }
    if let Some(sz) = attrs.size {
      write!(out, ";sz={sz}").ok();
    }
    if attrs.observable {
      out.push_str(";obs");
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::dispatch::{HandlerResult, RequestContext};
  use crate::router::{Attrs, Method};

  fn handler() -> super::super::Handler {
    Arc::new(|_: &RequestContext| HandlerResult::Content(serde_json::Value::Null))
  }

  #[test]
  fn renders_nothing_for_routes_without_metadata() {
    let mut r = Router::new();
    r.register(Method::Get, "ping", Attrs::default(), handler());
    assert_eq!(render(&r), "");
  }

  #[test]
  fn renders_multi_valued_attrs_quoted_and_space_separated() {
    let mut r = Router::new();
    r.register(Method::Get, "sensors/temp", Attrs { rt: vec!["sensor.temp".into(), "sensor.env".into()], observable: true, content_format: Some(50), ..Default::default() }, handler());

    let doc = render(&r);
    assert_eq!(doc, "</sensors/temp>;rt=\"sensor.temp sensor.env\";ct=50;obs");
  }

  #[test]
  fn renders_one_entry_per_route_comma_separated() {
    let mut r = Router::new();
    r.register(Method::Get, "a", Attrs { rt: vec!["x".into()], ..Default::default() }, handler());
    r.register(Method::Get, "b", Attrs { rt: vec!["y".into()], ..Default::default() }, handler());

    assert_eq!(render(&r), "</a>;rt=\"x\",</b>;rt=\"y\"");
  }
}
