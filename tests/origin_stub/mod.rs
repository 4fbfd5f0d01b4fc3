#![allow(dead_code)]

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

pub const CATALOG_HTML: &str = include_str!("../fixtures/catalog.html");
pub const ITEM_DETAIL_HTML: &str = include_str!("../fixtures/item_detail.html");
pub const CHAPTER_HTML: &str = include_str!("../fixtures/chapter.html");

pub static COVER_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];
pub static PAGE_ONE_JPG: &[u8] = b"\xff\xd8\xff\xe0page-one";
pub static PAGE_TWO_JPG: &[u8] = b"\xff\xd8\xff\xe0page-two";

/// Stand-in for the origin site: listing, one item, one chapter and the
/// images they reference. Images are refused without a `Referer`, like the
/// real image host does.
pub struct OriginStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OriginStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start origin stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or(&url).to_owned();
                seen.lock().expect("lock request log").push(path.clone());

                let has_referer = request
                    .headers()
                    .iter()
                    .any(|h| h.field.equiv("Referer"));

                enum Body {
                    Html(&'static str),
                    Image(&'static [u8], &'static str),
                    Redirect(&'static str),
                }

                let body = match path.as_str() {
                    "/daftar-komik/" => Body::Html(CATALOG_HTML),
                    "/manga/naruto/" => Body::Html(ITEM_DETAIL_HTML),
                    "/manga/old-naruto/" => Body::Redirect("/manga/naruto/"),
                    "/naruto-chapter-1/" => Body::Html(CHAPTER_HTML),
                    "/img/covers/naruto.png" => Body::Image(COVER_PNG, "image/png"),
                    "/img/naruto/1/01.jpg" => Body::Image(PAGE_ONE_JPG, "image/jpeg"),
                    "/img/naruto/1/02.jpg" => Body::Image(PAGE_TWO_JPG, "image/jpeg"),
                    _ => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("not found").with_status_code(404),
                        );
                        continue;
                    }
                };

                let _ = match body {
                    Body::Html(html) => {
                        let header = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/html; charset=utf-8"[..],
                        )
                        .expect("build header");
                        request.respond(tiny_http::Response::from_string(html).with_header(header))
                    }
                    Body::Image(_, _) if !has_referer => request.respond(
                        tiny_http::Response::from_string("hotlinking denied").with_status_code(403),
                    ),
                    Body::Image(bytes, content_type) => {
                        let header = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            content_type.as_bytes(),
                        )
                        .expect("build header");
                        request.respond(
                            tiny_http::Response::from_data(bytes.to_vec()).with_header(header),
                        )
                    }
                    Body::Redirect(location) => {
                        let header =
                            tiny_http::Header::from_bytes(&b"Location"[..], location.as_bytes())
                                .expect("build header");
                        request.respond(
                            tiny_http::Response::empty(301).with_header(header),
                        )
                    }
                };
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Number of requests the stub received for `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .expect("lock request log")
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }
}

impl Drop for OriginStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
