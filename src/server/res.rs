// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Response factory functions.

use headers::{ContentLength, ContentType, HeaderMapExt};
use hyper::header::{HeaderValue, ACCEPT};
use hyper::StatusCode;
use mime_guess::mime;

use crate::cli::NotFoundBodies;
use crate::server::{Request, Response};

pub const X_SERVED_BY: &str = "x-served-by";
pub const SERVED_BY: &str = "tinyCDN";

/// Generate a 404 NotFound response, negotiating the body on the
/// request's `Accept` header: HTML for HTML clients, JSON for JSON
/// clients, plain text for everyone else.
pub fn not_found(req: &Request, bodies: &NotFoundBodies) -> Response {
    let accept = req
        .headers()
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let (mime_type, body) = if accept.contains("text/html") {
        (mime::TEXT_HTML, bodies.html.clone())
    } else if accept.contains("application/json") {
        (mime::APPLICATION_JSON, bodies.json.clone())
    } else {
        (mime::TEXT_PLAIN, bodies.text.clone())
    };

    let mut res = Response::default();
    *res.status_mut() = StatusCode::NOT_FOUND;
    res.headers_mut().typed_insert(ContentType::from(mime_type));
    res.headers_mut().typed_insert(ContentLength(body.len() as u64));
    res.headers_mut()
        .insert(X_SERVED_BY, HeaderValue::from_static(SERVED_BY));
    *res.body_mut() = body.into();
    res
}

/// Generate 500 InternalServerError response.
pub fn internal_server_error(mut res: Response) -> Response {
    let body = "500 Internal Server Error";
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    *res.body_mut() = body.into();
    res.headers_mut().typed_insert(ContentLength(body.len() as u64));
    res
}
