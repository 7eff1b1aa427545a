// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::fs;
use std::io::{self, Cursor};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use httpdbase::{Config, Exchange, ExchangeInfo, Httpd, RequestHandler};

fn site() -> (tempfile::TempDir, RequestHandler) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("site");
    fs::create_dir_all(root.join("css")).unwrap();
    fs::write(root.join("index.html"), "<html>bench</html>").unwrap();
    fs::write(root.join("css/a.css"), "a{color:red}".repeat(200)).unwrap();
    fs::write(root.join("css/b.css"), "b{color:blue}".repeat(200)).unwrap();
    let handler = Httpd::new(
        Config::new()
            .with_home(&root)
            .with_cache_dir(dir.path().join("cache")),
    )
    .request_handler()
    .unwrap();
    (dir, handler)
}

fn dispatch(handler: &RequestHandler, info: ExchangeInfo) {
    let exchange = Exchange::new(info, Box::new(Cursor::new(Vec::new())), Box::new(io::sink()));
    handler.handle(exchange);
}

fn request_line_parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_line_parse");
    let lines = [
        ("short", "GET / HTTP/1.1"),
        ("query", "GET /path/to/resource?id=123&name=test HTTP/1.1"),
        ("absolute", "GET http://localhost:8080/css/a.css!+!b.css HTTP/1.1"),
    ];
    for (name, line) in lines.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| ExchangeInfo::from_request_line(black_box(line)).unwrap());
        });
    }
    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let (_dir, handler) = site();
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("static_file", |b| {
        b.iter(|| dispatch(&handler, ExchangeInfo::new("GET", "/css/a.css")));
    });
    group.bench_function("default_file", |b| {
        b.iter(|| dispatch(&handler, ExchangeInfo::new("GET", "/")));
    });
    group.bench_function("not_modified", |b| {
        b.iter(|| {
            dispatch(
                &handler,
                ExchangeInfo::new("GET", "/css/a.css").header("If-Modified-Since", "Fri, 31 Dec 2100 23:59:59 GMT"),
            )
        });
    });
    group.bench_function("gzip_cached", |b| {
        b.iter(|| {
            dispatch(
                &handler,
                ExchangeInfo::new("GET", "/css/a.css").header("Accept-Encoding", "gzip, deflate"),
            )
        });
    });
    group.bench_function("combined", |b| {
        b.iter(|| dispatch(&handler, ExchangeInfo::new("GET", "/css/a.css!+!b.css")));
    });

    group.finish();
}

criterion_group!(benches, request_line_parse_benchmark, dispatch_benchmark);
criterion_main!(benches);
