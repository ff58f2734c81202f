// Copyright (c) 2018 Weihang Lo
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::crate_description;
use clap::{Arg, ArgMatches};

const ABOUT: &str = concat!("\n", crate_description!()); // Add extra newline.

fn app() -> clap::Command<'static> {
    let arg_address = Arg::new("address")
        .short('b')
        .long("bind")
        .default_value("127.0.0.1")
        .help("Specify bind address")
        .value_name("address");

    let arg_port = Arg::new("port")
        .short('p')
        .long("port")
        .default_value("5000")
        .help("Specify port to listen on")
        .value_name("port");

    let arg_source = Arg::new("source")
        .default_value(".")
        .help("Directory of the read-only source assets");

    let arg_dest = Arg::new("dest")
        .short('d')
        .long("dest")
        .default_value(".")
        .help("Directory the derivative cache is written to")
        .value_name("path");

    let arg_compression = Arg::new("compression")
        .short('z')
        .long("compression")
        .takes_value(true)
        .help("Enable precompression: best|speed|no|default or a level 1-9")
        .value_name("level");

    let arg_compress = Arg::new("compress")
        .short('x')
        .long("compress")
        .takes_value(true)
        .help("Comma-separated list of compressible extensions, dots optional")
        .value_name("exts");

    let arg_etag = Arg::new("etag")
        .short('e')
        .long("etag")
        .default_value("sha256")
        .help("Hash algorithm backing the ETag validator, or `false` to disable")
        .value_name("algo");

    let arg_cache = Arg::new("cache")
        .short('c')
        .long("cache")
        .default_value("30672000")
        .help("Specify max-age of HTTP caching in seconds")
        .value_name("seconds");

    let arg_no_auto_index = Arg::new("no-auto-index")
        .long("no-auto-index")
        .help("Don't rewrite directory requests to their index.html");

    let arg_no_converge = Arg::new("no-converge")
        .long("no-converge")
        .help("Apply file operations in place instead of through the authority task");

    let arg_cors = Arg::new("cors")
        .short('C')
        .long("cors")
        .takes_value(true)
        .help("Send Access-Control-Allow-Origin with the given origin")
        .value_name("origin");

    let arg_404_html = Arg::new("404-html")
        .long("404-html")
        .takes_value(true)
        .help("Custom 404 body served to HTML clients")
        .value_name("body");

    let arg_404_json = Arg::new("404-json")
        .long("404-json")
        .takes_value(true)
        .help("Custom 404 body served to JSON clients")
        .value_name("body");

    let arg_404_text = Arg::new("404-text")
        .long("404-text")
        .takes_value(true)
        .help("Custom 404 body served to everyone else")
        .value_name("body");

    let arg_no_log = Arg::new("no-log")
        .long("no-log")
        .help("Don't log any request/response information.");

    clap::command!()
        .about(ABOUT)
        .arg(arg_address)
        .arg(arg_port)
        .arg(arg_source)
        .arg(arg_dest)
        .arg(arg_compression)
        .arg(arg_compress)
        .arg(arg_etag)
        .arg(arg_cache)
        .arg(arg_no_auto_index)
        .arg(arg_no_converge)
        .arg(arg_cors)
        .arg(arg_404_html)
        .arg(arg_404_json)
        .arg(arg_404_text)
        .arg(arg_no_log)
}

pub fn matches() -> ArgMatches {
    app().get_matches()
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn verify_app() {
        app().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let matches = app()
            .try_get_matches_from([
                "tinycdn",
                "--dest",
                "/tmp/cache",
                "--compression",
                "best",
                "--compress",
                "js,.css",
                "--etag",
                "false",
                "--no-auto-index",
                "--cors",
                "*",
                "/srv/assets",
            ])
            .unwrap();
        assert_eq!(matches.value_of("source"), Some("/srv/assets"));
        assert_eq!(matches.value_of("dest"), Some("/tmp/cache"));
        assert_eq!(matches.value_of("compression"), Some("best"));
        assert_eq!(matches.value_of("compress"), Some("js,.css"));
        assert_eq!(matches.value_of("etag"), Some("false"));
        assert!(matches.is_present("no-auto-index"));
        assert_eq!(matches.value_of("cors"), Some("*"));
    }
}
