//! Preview negotiation over a real connection: `ieof` terminated previews
//! and the `100 Continue` round trip.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::HeaderValue;
use icap_server::{Handler, IcapResult, Request, ResponseWriter, ServeMux};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start(handler: Arc<dyn Handler>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = icap_server::serve(listener, handler).await;
    });
    addr
}

async fn read_until_blank_line(conn: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        conn.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Captures whatever body bytes it can read, then replies 204.
struct CaptureBody {
    seen: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl Handler for CaptureBody {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()> {
        assert_eq!(req.preview_size, Some(4));
        let mut body = Vec::new();
        req.body.read_to_end(&mut body).await?;
        assert!(!req.body.preview_exhausted(), "ieof preview is complete");
        *self.seen.lock().unwrap() = body;
        w.write_header(204, None, false).await
    }
}

#[tokio::test]
async fn preview_with_ieof_is_a_complete_body() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mux = Arc::new(ServeMux::new());
    mux.handle("/scan", Arc::new(CaptureBody { seen: seen.clone() }));
    let addr = start(mux).await;

    let http_head = "GET / HTTP/1.1\r\nHost: a\r\n\r\n";
    let request = format!(
        "REQMOD icap://s/scan ICAP/1.0\r\n\
         Preview: 4\r\n\
         Connection: close\r\n\
         Encapsulated: req-hdr=0, req-body={}\r\n\
         \r\n\
         {}4\r\n\
         Wiki\r\n\
         0; ieof\r\n\
         \r\n",
        http_head.len(),
        http_head
    );

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    conn.read_to_end(&mut buf).await.unwrap();
    let resp = String::from_utf8(buf).unwrap();

    assert!(resp.starts_with("ICAP/1.0 204 No Modifications\r\n"), "got: {resp}");
    assert_eq!(seen.lock().unwrap().as_slice(), b"Wiki");
}

/// Reads the preview, asks for the rest, and captures the whole body.
struct ContinueAndCapture {
    seen: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl Handler for ContinueAndCapture {
    async fn serve_icap(
        &self,
        w: &mut ResponseWriter<'_>,
        req: &mut Request<'_>,
    ) -> IcapResult<()> {
        w.header()
            .insert("ISTag", HeaderValue::from_static("\"PREV-1\""));

        let mut body = Vec::new();
        req.body.read_to_end(&mut body).await?;
        assert!(req.body.preview_exhausted());

        w.send_continue().await?;
        req.body.resume();
        req.body.read_to_end(&mut body).await?;
        assert!(!req.body.preview_exhausted());

        *self.seen.lock().unwrap() = body;
        w.write_header(204, None, false).await
    }
}

#[tokio::test]
async fn preview_continue_obtains_the_remainder() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mux = Arc::new(ServeMux::new());
    mux.handle("/scan", Arc::new(ContinueAndCapture { seen: seen.clone() }));
    let addr = start(mux).await;

    let http_head = "GET / HTTP/1.1\r\nHost: a\r\n\r\n";
    let request = format!(
        "REQMOD icap://s/scan ICAP/1.0\r\n\
         Preview: 4\r\n\
         Connection: close\r\n\
         Encapsulated: req-hdr=0, req-body={}\r\n\
         \r\n\
         {}4\r\n\
         Wiki\r\n\
         0\r\n\
         \r\n",
        http_head.len(),
        http_head
    );

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(request.as_bytes()).await.unwrap();

    let interim = read_until_blank_line(&mut conn).await;
    assert_eq!(interim, "ICAP/1.0 100 Continue\r\n\r\n");

    conn.write_all(b"6\r\npedia!\r\n0\r\n\r\n").await.unwrap();

    let mut buf = Vec::new();
    conn.read_to_end(&mut buf).await.unwrap();
    let resp = String::from_utf8(buf).unwrap();
    assert!(resp.starts_with("ICAP/1.0 204 No Modifications\r\n"), "got: {resp}");

    assert_eq!(seen.lock().unwrap().as_slice(), b"Wikipedia!");
}
