// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_compression::Level;
use bytes::Bytes;
use chrono::Local;
use headers::{CacheControl, ContentLength, ContentType, Expires, HeaderMapExt, LastModified};
use hyper::header::{
    HeaderValue, ACCEPT_ENCODING, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_ENCODING, ETAG,
    IF_NONE_MATCH, VARY,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, HeaderMap, StatusCode};
use mime_guess::mime;
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::cache::converge::Converger;
use crate::cache::disk::{Disk, Meta};
use crate::cache::flight::{Flight, Ticket};
use crate::cache::hash::HashAlgo;
use crate::cache::{OpError, OpResult};
use crate::cli::Args;
use crate::extensions::PathExt;
use crate::http::encoding::{select_group, Group};
use crate::http::sanitize::{sanitize, Sanitized};
use crate::server::{res, Request, Response};
use crate::BoxResult;

/// Called once per response with the channel outcome and the cleaned URL.
pub type ResponseHook = Arc<dyn Fn(Option<&OpError>, &str) + Send + Sync>;
/// Called once per failed channel with the error, the cleaned URL and the
/// number of responders held on the channel.
pub type ErrorHook = Arc<dyn Fn(&OpError, &str, usize) + Send + Sync>;

/// Run the server.
pub async fn serve(args: Args) -> BoxResult<()> {
    let address = args.address()?;

    let inner = CdnService::new(args).with_error_hook(Arc::new(|err, url, held| {
        eprintln!(
            "[{}] {} failed ({} held): {}",
            Local::now().format("%d/%b/%Y %H:%M:%S"),
            url,
            held,
            err,
        );
    }));
    let inner = Arc::new(inner);
    let make_svc = make_service_fn(move |_| {
        let inner = inner.clone();
        async {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let inner = inner.clone();
                inner.call(req)
            }))
        }
    });
    let server = hyper::Server::bind(&address).serve(make_svc);
    let address = server.local_addr();
    eprintln!("Assets served on http://{address}");

    if let Err(e) = server.await {
        eprintln!("Server error: {e:?}");
    };

    Ok(())
}

/// What the channel leader learned, shared read-only with every coalesced
/// responder. The header set is built exactly once and never mutated once
/// shared; responders clone it as a value.
struct Served {
    target: PathBuf,
    etag: Option<String>,
    headers: HeaderMap,
}

type Outcome = Result<Arc<Served>, OpError>;

pub struct CdnService {
    args: Args,
    converger: Converger,
    channel: Flight<Outcome>,
    on_response: Option<ResponseHook>,
    on_error: Option<ErrorHook>,
}

impl CdnService {
    /// Build the service. Must run inside the runtime: the converger
    /// spawns its authority task here.
    pub fn new(args: Args) -> Self {
        let disk = Arc::new(Disk::new(args.compression.unwrap_or(Level::Default)));
        let converger = if args.converge {
            Converger::spawn(disk)
        } else {
            Converger::passthrough(disk)
        };
        Self {
            args,
            converger,
            channel: Flight::new(),
            on_response: None,
            on_error: None,
        }
    }

    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.on_response = Some(hook);
        self
    }

    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub async fn call(self: Arc<Self>, req: Request) -> Result<Response, hyper::Error> {
        let res = self
            .clone()
            .handle_request(&req)
            .await
            .unwrap_or_else(|_| res::internal_server_error(Response::default()));
        if self.args.log {
            println!(
                r#"[{}] "{} {}" - {}"#,
                Local::now().format("%d/%b/%Y %H:%M:%S"),
                req.method(),
                req.uri(),
                res.status(),
            );
        }
        Ok(res)
    }

    /// Request handler for `CdnService`.
    ///
    /// Sanitize the URL, pick the encoding group, coalesce on the
    /// `group:url` channel, then answer from the channel's shared outcome.
    pub async fn handle_request(self: Arc<Self>, req: &Request) -> BoxResult<Response> {
        let raw = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| req.uri().path());
        let sanitized = match sanitize(raw, self.args.auto_index) {
            Some(sanitized) => sanitized,
            // Directory request.
            None => return Ok(res::not_found(req, &self.args.not_found)),
        };

        let accepts = req
            .headers()
            .get(ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok());
        let group = select_group(&self.args.compress_exts, &sanitized.url, accepts);

        let channel = format!("{}:{}", group, sanitized.url);
        let rx = match self.channel.add(&channel) {
            // The leader hands the production off to a detached task and
            // waits like any follower: a responder that hangs up must not
            // abort the producer the rest of the channel depends on.
            Ticket::Leader => {
                let rx = self.channel.attach(&channel);
                let this = self.clone();
                let sanitized = sanitized.clone();
                tokio::spawn(async move {
                    let outcome = this.produce(&sanitized, group).await;
                    let held = this.channel.finish(&channel, outcome.clone());
                    if let (Err(err), Some(hook)) = (&outcome, &this.on_error) {
                        hook(err, &sanitized.url, held);
                    }
                });
                rx
            }
            Ticket::Follower(rx) => rx,
        };
        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(OpError::opaque("producer abandoned the channel")));

        if let Some(hook) = &self.on_response {
            hook(outcome.as_ref().err(), &sanitized.url);
        }

        match outcome {
            Ok(served) => self.respond(req, &served).await,
            Err(_) => Ok(res::not_found(req, &self.args.not_found)),
        }
    }

    /// Drive the channel's data flow: settle the artifact, settle the
    /// validator, build the shared header set.
    async fn produce(&self, sanitized: &Sanitized, group: Group) -> Outcome {
        let source = self.args.source.join(&sanitized.rel);
        let dest = self.args.dest.join(&sanitized.rel);
        let target = if group.is_raw() {
            source.clone()
        } else {
            dest.with_suffix(group.name())
        };

        let meta = self.settle_target(&source, &target, group).await?;
        let etag = match self.args.etag {
            Some(algo) => Some(self.settle_etag(&target, &dest, group, algo).await?),
            None => None,
        };
        let headers = self.build_headers(&sanitized.url, group, &meta, etag.as_deref());
        Ok(Arc::new(Served {
            target,
            etag,
            headers,
        }))
    }

    /// Stat the artifact. On a miss for a compressed group, produce the
    /// artifact from the source and stat again; a raw miss is terminal.
    async fn settle_target(&self, source: &Path, target: &Path, group: Group) -> OpResult<Meta> {
        for attempt in 0..2 {
            match self.converger.stat(target).await {
                Ok(meta) if meta.is_file => return Ok(meta),
                Ok(_) => return Err(OpError::opaque("not a regular file")),
                Err(err) => {
                    if group.is_raw() || attempt > 0 {
                        return Err(err);
                    }
                    self.converger.stat(source).await?;
                    self.converger.mkdir_all(&self.args.dest, target).await?;
                    self.converger.write_stream(source, target, group).await?;
                }
            }
        }
        Err(OpError::opaque("artifact vanished after materialization"))
    }

    /// Read the sidecar validator, or compute and persist it on a miss.
    async fn settle_etag(
        &self,
        target: &Path,
        dest: &Path,
        group: Group,
        algo: HashAlgo,
    ) -> OpResult<String> {
        let sidecar = dest.with_suffix(group.name()).with_suffix(algo.name());
        match self.converger.read_file(&sidecar).await {
            Ok(content) => Ok(String::from_utf8_lossy(&content).into_owned()),
            Err(_) => {
                let etag = self.converger.hash(target, algo).await?;
                self.converger.mkdir_all(&self.args.dest, &sidecar).await?;
                self.converger
                    .write_file(&sidecar, Bytes::from(etag.clone()))
                    .await?;
                Ok(etag)
            }
        }
    }

    /// Build the header set shared by every responder on the channel.
    fn build_headers(
        &self,
        url: &str,
        group: Group,
        meta: &Meta,
        etag: Option<&str>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mime_type = Path::new(url).mime().unwrap_or(mime::APPLICATION_OCTET_STREAM);
        headers.typed_insert(ContentType::from(mime_type));
        headers.typed_insert(ContentLength(meta.size));
        headers.typed_insert(LastModified::from(meta.mtime));
        headers
            .insert(res::X_SERVED_BY, HeaderValue::from_static(res::SERVED_BY));

        if let Some(etag) = etag.filter(|etag| !etag.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(ETAG, value);
            }
            let max_age = Duration::from_secs(self.args.max_age);
            headers.typed_insert(CacheControl::new().with_public().with_max_age(max_age));
            headers.typed_insert(Expires::from(SystemTime::now() + max_age));
        }
        if !group.is_raw() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(group.name()));
            headers.insert(VARY, HeaderValue::from_name(ACCEPT_ENCODING));
        }
        if let Some(origin) = &self.args.cors {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
        }
        headers
    }

    /// Answer one responder from the shared outcome: 304 when its
    /// validator matches, otherwise a fresh stream of the artifact.
    async fn respond(&self, req: &Request, served: &Served) -> BoxResult<Response> {
        let mut res = Response::default();
        *res.headers_mut() = served.headers.clone();

        if let Some(etag) = &served.etag {
            let sent = req
                .headers()
                .get(IF_NONE_MATCH)
                .and_then(|value| value.to_str().ok());
            if sent == Some(etag.as_str()) {
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                return Ok(res);
            }
        }

        // One open read stream per response.
        let file = match fs::File::open(&served.target).await {
            Ok(file) => file,
            Err(_) => return Ok(res::not_found(req, &self.args.not_found)),
        };
        *res.body_mut() = Body::wrap_stream(ReaderStream::new(file));
        Ok(res)
    }
}
