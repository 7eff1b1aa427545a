// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

mod common;

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use flate2::read::{DeflateDecoder, GzDecoder};
use httpdbase::{
    ContentHandler, ExchangeInfo, HttpResponse, PostHandler, PostOutcome, Request, ThreadModel,
};

use common::{build_site, exchange, get, httpd};

fn gunzip(data: &[u8]) -> String {
    let mut out = String::new();
    GzDecoder::new(data).read_to_string(&mut out).unwrap();
    out
}

fn unquote(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn cache_entries(cache: &Path) -> Vec<String> {
    fs::read_dir(cache)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

struct Site {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    cache: std::path::PathBuf,
}

fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("site");
    let cache = dir.path().join("cache");
    build_site(&root);
    Site { _dir: dir, root, cache }
}

#[test]
fn test_get_static_file() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = get(&handler, "/css/a.css");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "a{color:red}");
    assert_eq!(reply.header("Content-Type"), Some("text/css"));
    assert_eq!(reply.header("Content-Length"), Some("12"));
    assert_eq!(reply.header("Connection"), Some("close"));
    assert!(reply.header("Last-Modified").is_some());
    assert!(reply.header("Date").is_some());
}

/// 同一个 ETag 命中 304，过期的 ETag 得到 200 和同一个新 ETag
#[test]
fn test_conditional_get_with_etag() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let first = get(&handler, "/css/a.css");
    let etag = first.header("ETag").unwrap().to_string();

    let hit = exchange(
        &handler,
        ExchangeInfo::new("GET", "/css/a.css").header("If-None-Match", &etag),
        b"",
    );
    assert_eq!(hit.status, 304);
    assert!(hit.body.is_empty());
    assert!(hit.header("Content-Length").is_none());

    let stale = exchange(
        &handler,
        ExchangeInfo::new("GET", "/css/a.css").header("If-None-Match", "\"deadbeef\""),
        b"",
    );
    assert_eq!(stale.status, 200);
    assert_eq!(stale.text(), "a{color:red}");
    assert_eq!(stale.header("ETag"), Some(etag.as_str()));
}

#[test]
fn test_conditional_get_with_modified_since() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let first = get(&handler, "/js/app.js");
    let modified = first.header("Last-Modified").unwrap().to_string();
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/js/app.js").header("If-Modified-Since", &modified),
        b"",
    );
    assert_eq!(reply.status, 304);

    let old = exchange(
        &handler,
        ExchangeInfo::new("GET", "/js/app.js")
            .header("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT"),
        b"",
    );
    assert_eq!(old.status, 200);
}

/// 不存在的资源不会因为 `*` 或空内容的摘要而得到 304
#[test]
fn test_conditional_get_on_missing_file() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    for tag in ["*", "\"da39a3ee5e6b4b0d3255bfef95601890afd80709\""] {
        let reply = exchange(
            &handler,
            ExchangeInfo::new("GET", "/nope.txt").header("If-None-Match", tag),
            b"",
        );
        assert_eq!(reply.status, 404, "{}", tag);
    }

    let present = exchange(
        &handler,
        ExchangeInfo::new("GET", "/css/a.css").header("If-None-Match", "*"),
        b"",
    );
    assert_eq!(present.status, 304);
}

#[test]
fn test_caching_disabled() {
    let site = site();
    let mut server = httpd(&site.root, &site.cache);
    server.set_caching(false);
    let handler = server.request_handler().unwrap();
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/css/a.css").header("If-None-Match", "*"),
        b"",
    );
    assert_eq!(reply.status, 200);
    assert!(reply.header("ETag").is_none());
}

#[test]
fn test_head_request() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(&handler, ExchangeInfo::new("HEAD", "/big.txt"), b"");
    assert_eq!(reply.status, 200);
    let expected = fs::metadata(site.root.join("big.txt")).unwrap().len();
    assert_eq!(reply.header("Content-Length"), Some(expected.to_string().as_str()));
    assert!(reply.body.is_empty());
}

#[test]
fn test_default_files() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    assert_eq!(get(&handler, "/").text(), "<html><body>home</body></html>");
    // index.html 不存在时使用 index.htm
    let legacy = get(&handler, "/legacy/");
    assert_eq!(legacy.status, 200);
    assert_eq!(legacy.text(), "<html>legacy</html>");
    assert_eq!(legacy.header("Content-Type"), Some("text/html"));
}

#[test]
fn test_directory_listing() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = get(&handler, "/docs/");
    assert_eq!(reply.status, 200);
    let html = reply.text();
    let dir_at = html.find("manual").unwrap();
    let file_at = html.find("readme.txt").unwrap();
    assert!(dir_at < file_at, "目录应排在文件前面");
}

#[test]
fn test_directory_redirect_and_browse_denied() {
    let site = site();
    let mut server = httpd(&site.root, &site.cache);
    server.set_directory_browse(Arc::new(|request: &Request| !request.path().starts_with("docs/manual")));
    let handler = server.request_handler().unwrap();

    let redirect = get(&handler, "/docs");
    assert_eq!(redirect.status, 301);
    assert_eq!(redirect.header("Location"), Some("/docs/"));

    assert_eq!(get(&handler, "/docs/").status, 200);
    assert_eq!(get(&handler, "/docs/manual/").status, 403);
}

#[test]
fn test_not_found_body_depends_on_accept() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let browser = exchange(
        &handler,
        ExchangeInfo::new("GET", "/missing.html").header("Accept", "text/html,*/*;q=0.8"),
        b"",
    );
    assert_eq!(browser.status, 404);
    assert!(browser.text().contains("404"));

    let client = get(&handler, "/missing.html");
    assert_eq!(client.status, 404);
    assert!(client.body.is_empty());
}

#[test]
fn test_path_traversal_stays_inside_home() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("site");
    build_site(&root);
    fs::write(dir.path().join("secret.txt"), "secret").unwrap();
    let handler = httpd(&root, &dir.path().join("cache")).request_handler().unwrap();

    for uri in ["/../secret.txt", "/css/../../secret.txt", "/%2e%2e/secret.txt"] {
        let reply = get(&handler, uri);
        assert_eq!(reply.status, 404, "{}", uri);
        assert!(!reply.text().contains("secret"));
    }
}

/// 合并请求中的每个文件都单独解析 `..`，不能借此读取主目录之外的文件
#[test]
fn test_combined_path_traversal_stays_inside_home() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("site");
    build_site(&root);
    fs::create_dir_all(dir.path().join("private")).unwrap();
    fs::write(dir.path().join("private/secret.css"), "SECRET").unwrap();
    let handler = httpd(&root, &dir.path().join("cache")).request_handler().unwrap();

    for uri in [
        "/css/a.css!+!../private/secret.css",
        "/css/a.css!+!/css/../../private/secret.css",
        "/css/a.css!+!%2e%2e/private/secret.css",
    ] {
        let reply = get(&handler, uri);
        assert_eq!(reply.status, 404, "{}", uri);
        assert!(!reply.text().contains("SECRET"), "{}", uri);
    }
}

#[test]
fn test_mime_negotiation() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    assert_eq!(get(&handler, "/js/app.js").header("Content-Type"), Some("text/javascript"));
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/js/app.js").header("Accept", "application/javascript, */*"),
        b"",
    );
    assert_eq!(reply.header("Content-Type"), Some("application/javascript"));
}

#[test]
fn test_method_not_allowed() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(&handler, ExchangeInfo::new("DELETE", "/css/a.css"), b"");
    assert_eq!(reply.status, 405);
    assert!(site.root.join("css/a.css").exists());
}

// 合并请求

#[test]
fn test_combined_request_order() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let ab = get(&handler, "/css/a.css!+!b.css");
    assert_eq!(ab.status, 200);
    assert_eq!(ab.text(), "a{color:red}\rb{color:blue}\r");
    assert_eq!(ab.header("Content-Type"), Some("text/css"));

    let ba = get(&handler, "/css/b.css!+!/css/a.css");
    assert_eq!(ba.text(), "b{color:blue}\ra{color:red}\r");
    assert_ne!(ab.header("ETag"), ba.header("ETag"));
}

#[test]
fn test_combined_conditional_get() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let first = get(&handler, "/css/a.css!+!b.css");
    let etag = first.header("ETag").unwrap().to_string();
    let again = exchange(
        &handler,
        ExchangeInfo::new("GET", "/css/a.css!+!b.css").header("If-None-Match", &etag),
        b"",
    );
    assert_eq!(again.status, 304);
}

#[test]
fn test_combined_mixed_extensions_rejected() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = get(&handler, "/css/a.css!+!/js/app.js");
    assert_eq!(reply.status, 400);
}

#[test]
fn test_combined_missing_member() {
    let site = site();
    let lenient = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = get(&lenient, "/css/a.css!+!missing.css");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "a{color:red}\r");

    let mut server = httpd(&site.root, &site.cache);
    server.set_combined("!+!", vec![".css".to_string(), ".js".to_string()], true);
    let strict = server.request_handler().unwrap();
    assert_eq!(get(&strict, "/css/a.css!+!missing.css").status, 404);
}

// 压缩与编码缓存

#[test]
fn test_gzip_response_and_cache_reuse() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let original = fs::read_to_string(site.root.join("big.txt")).unwrap();

    let request = || ExchangeInfo::new("GET", "/big.txt").header("Accept-Encoding", "gzip, deflate");
    let first = exchange(&handler, request(), b"");
    assert_eq!(first.status, 200);
    assert_eq!(first.header("Content-Encoding"), Some("gzip"));
    assert_eq!(
        first.header("Content-Length"),
        Some(first.body.len().to_string().as_str())
    );
    assert_eq!(gunzip(&first.body), original);

    let etag = unquote(first.header("ETag").unwrap());
    let cached = site.cache.join(format!("{}.gzip", etag));
    assert!(cached.is_file());

    // 第二次请求直接发送缓存文件，而不是重新压缩
    let marker = httpdbase::cache::compress_bytes(b"from cache", Some(httpdbase::HttpEncoding::Gzip)).unwrap();
    fs::write(&cached, &marker).unwrap();
    let second = exchange(&handler, request(), b"");
    assert_eq!(gunzip(&second.body), "from cache");
}

#[test]
fn test_deflate_only_client() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/big.txt").header("Accept-Encoding", "deflate"),
        b"",
    );
    assert_eq!(reply.header("Content-Encoding"), Some("deflate"));
    let mut out = String::new();
    DeflateDecoder::new(&reply.body[..]).read_to_string(&mut out).unwrap();
    assert_eq!(out, fs::read_to_string(site.root.join("big.txt")).unwrap());
}

/// 不可缓存的请求只使用临时编码文件，请求结束后不留下任何文件
#[test]
fn test_uncacheable_request_leaves_no_cache_files() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/big.txt")
            .header("Accept-Encoding", "gzip")
            .header("Cache-Control", "no-cache"),
        b"",
    );
    assert_eq!(reply.header("Content-Encoding"), Some("gzip"));
    assert!(reply.header("ETag").is_none());
    assert!(!gunzip(&reply.body).is_empty());
    assert!(cache_entries(&site.cache).is_empty(), "{:?}", cache_entries(&site.cache));
}

#[test]
fn test_old_internet_explorer_gets_identity() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(
        &handler,
        ExchangeInfo::new("GET", "/big.txt")
            .header("Accept-Encoding", "gzip")
            .header("User-Agent", "Mozilla/4.0 (compatible; MSIE 5.5; Windows NT 5.0)"),
        b"",
    );
    assert!(reply.header("Content-Encoding").is_none());
    assert!(reply.text().starts_with("lorem ipsum"));
}

#[test]
fn test_head_with_gzip_reports_encoded_length() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let full = exchange(
        &handler,
        ExchangeInfo::new("GET", "/big.txt").header("Accept-Encoding", "gzip"),
        b"",
    );
    let head = exchange(
        &handler,
        ExchangeInfo::new("HEAD", "/big.txt").header("Accept-Encoding", "gzip"),
        b"",
    );
    assert!(head.body.is_empty());
    assert_eq!(head.header("Content-Encoding"), Some("gzip"));
    assert_eq!(head.header("Content-Length"), full.header("Content-Length"));
}

// POST

struct EchoToFile;

impl PostHandler for EchoToFile {
    fn handle_post(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        request: &Request,
        _response: &mut HttpResponse,
        scratch_dir: Option<&Path>,
    ) -> PostOutcome {
        let name = request
            .post_params()
            .and_then(|p| p.get("name"))
            .unwrap_or("nobody")
            .to_string();
        let dir = match scratch_dir {
            Some(d) => d,
            None => return PostOutcome::Unhandled,
        };
        let file = dir.join("echo.txt");
        match fs::write(&file, format!("hello {}", name)) {
            Ok(()) => PostOutcome::File(file),
            Err(e) => PostOutcome::Invalid(e.to_string()),
        }
    }
}

struct Created;

impl PostHandler for Created {
    fn handle_post(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
        _response: &mut HttpResponse,
        _scratch_dir: Option<&Path>,
    ) -> PostOutcome {
        let mut response = HttpResponse::new();
        response.set_code(201).set_body("created");
        PostOutcome::Response(response)
    }
}

struct Broken;

impl PostHandler for Broken {
    fn handle_post(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
        _response: &mut HttpResponse,
        _scratch_dir: Option<&Path>,
    ) -> PostOutcome {
        PostOutcome::Invalid("unexpected result".to_string())
    }
}

fn form(uri: &str, body: &str) -> ExchangeInfo {
    ExchangeInfo::new("POST", uri)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Content-Length", &body.len().to_string())
}

#[test]
fn test_post_converted_to_get() {
    let site = site();
    let mut server = httpd(&site.root, &site.cache);
    server.add_post_handler("/greet", Arc::new(EchoToFile));
    let handler = server.request_handler().unwrap();
    let body = "name=Ada+Lovelace";
    let reply = exchange(&handler, form("/greet", body), body.as_bytes());
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "hello Ada Lovelace");
    assert_eq!(reply.header("Content-Type"), Some("text/plain"));
}

#[derive(Default)]
struct MethodLog(Mutex<Vec<String>>);

impl ContentHandler for MethodLog {
    fn post_serve(&self, _id: u64, _exchange: &ExchangeInfo, request: &Request, _success: bool) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method_name(), request.method()));
    }
}

/// POST 返回的文件按 GET 处理，内容处理器看到的也是 GET
#[test]
fn test_post_result_is_served_as_get() {
    let site = site();
    let log = Arc::new(MethodLog::default());
    let mut server = httpd(&site.root, &site.cache);
    server.add_post_handler("/greet", Arc::new(EchoToFile));
    server.add_handler("txt", log.clone());
    let handler = server.request_handler().unwrap();
    let body = "name=Grace";
    let reply = exchange(&handler, form("/greet", body), body.as_bytes());
    assert_eq!(reply.text(), "hello Grace");
    assert_eq!(*log.0.lock().unwrap(), vec!["GET GET"]);
}

#[test]
fn test_post_handler_by_extension_and_response() {
    let site = site();
    let mut server = httpd(&site.root, &site.cache);
    server.add_post_handler(".do", Arc::new(Created));
    server.add_post_handler("/broken.do", Arc::new(Broken));
    let handler = server.request_handler().unwrap();

    let created = exchange(&handler, form("/orders/new.do", ""), b"");
    assert_eq!(created.status, 201);
    assert_eq!(created.text(), "created");

    let broken = exchange(&handler, form("/broken.do", ""), b"");
    assert_eq!(broken.status, 500);
}

#[test]
fn test_post_without_handler_is_unavailable() {
    let site = site();
    let handler = httpd(&site.root, &site.cache).request_handler().unwrap();
    let reply = exchange(&handler, form("/index.html", "a=1"), b"a=1");
    assert_eq!(reply.status, 503);
}

// 内容处理器钩子

#[derive(Default)]
struct Hooks {
    served: Mutex<Vec<String>>,
}

impl ContentHandler for Hooks {
    fn pre_serve(&self, _id: u64, _exchange: &ExchangeInfo, request: &Request) -> bool {
        request.name() != "blocked.txt"
    }

    fn on_file_not_found(&self, _id: u64, _exchange: &ExchangeInfo, request: &Request) -> Option<Request> {
        if request.path() == "old.txt" {
            Some(request.derive(request.backing(), "docs/readme.txt"))
        } else {
            None
        }
    }

    fn post_serve(&self, _id: u64, _exchange: &ExchangeInfo, request: &Request, success: bool) {
        self.served
            .lock()
            .unwrap()
            .push(format!("{}:{}", request.path(), success));
    }
}

#[test]
fn test_content_handler_hooks() {
    let site = site();
    fs::write(site.root.join("blocked.txt"), "blocked").unwrap();
    let hooks = Arc::new(Hooks::default());
    let mut server = httpd(&site.root, &site.cache);
    server.add_handler(".TXT", hooks.clone());
    let handler = server.request_handler().unwrap();

    let moved = get(&handler, "/old.txt");
    assert_eq!(moved.status, 200);
    assert_eq!(moved.text(), "read me");

    assert_eq!(get(&handler, "/blocked.txt").status, 404);
    assert_eq!(get(&handler, "/nothing.txt").status, 404);

    let served = hooks.served.lock().unwrap().clone();
    assert_eq!(served, vec!["docs/readme.txt:true", "nothing.txt:false"]);
}

struct BodyWithoutLength;

impl ContentHandler for BodyWithoutLength {
    fn serve_body(
        &self,
        _id: u64,
        _exchange: &ExchangeInfo,
        _request: &Request,
    ) -> Option<Box<dyn Read + Send>> {
        Some(Box::new(std::io::Cursor::new(b"payload".to_vec())))
    }
}

#[test]
fn test_serve_body_requires_content_length() {
    let site = site();
    fs::write(site.root.join("data.bin"), [0u8, 1, 2]).unwrap();
    let mut server = httpd(&site.root, &site.cache);
    server.add_handler("bin", Arc::new(BodyWithoutLength));
    let handler = server.request_handler().unwrap();
    assert_eq!(get(&handler, "/data.bin").status, 500);
}

#[test]
fn test_single_thread_model_dispatches_in_memory() {
    let site = site();
    let mut server = httpd(&site.root, &site.cache);
    server.set_thread_model(ThreadModel::Single, 1, 1);
    let handler = server.request_handler().unwrap();
    assert_eq!(get(&handler, "/").status, 200);
}
