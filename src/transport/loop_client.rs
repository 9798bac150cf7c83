use std::io;
use std::rc::Rc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::config::ClientConfig;
use super::{Completion, Transport};
use crate::request::PendingRequest;
use crate::response::ResponseView;
use crate::wire::state::{RecvResponse, SendBody};
use crate::wire::{Call, RecvResponseResult, SendRequestResult};
use crate::Error;

#[cfg(feature = "tls")]
use super::tls::TlsConnector;

/// [`Transport`] on a tokio current-thread runtime.
///
/// Every exchange runs as a task spawned with
/// [`spawn_local`](tokio::task::spawn_local), so the client must be used from
/// within a [`LocalSet`](tokio::task::LocalSet). Each exchange opens a fresh
/// connection. At most `max_clients` exchanges are in flight, the rest wait
/// for a slot.
pub struct LoopClient {
    shared: Rc<Shared>,
}

struct Shared {
    config: ClientConfig,
    slots: Semaphore,
    #[cfg(feature = "tls")]
    tls: TlsConnector,
}

impl LoopClient {
    /// Create a client from `config`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let shared = Shared {
            slots: Semaphore::new(config.get_max_clients()),
            #[cfg(feature = "tls")]
            tls: TlsConnector::new(config.get_verify_certificates())?,
            config,
        };

        Ok(LoopClient {
            shared: Rc::new(shared),
        })
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Number of free exchange slots.
    pub fn available_slots(&self) -> usize {
        self.shared.slots.available_permits()
    }
}

impl Transport for LoopClient {
    fn fetch(&self, request: PendingRequest, done: Completion) {
        let shared = self.shared.clone();

        tokio::task::spawn_local(async move {
            let url = request.url();
            let method = request.method().clone();

            let result = match shared.slots.acquire().await {
                Ok(_slot) => {
                    let deadline = request.timeout();
                    match timeout(deadline, shared.exchange(request)).await {
                        Ok(r) => r,
                        Err(e) => Err(e.into()),
                    }
                }
                Err(_) => Err(Error::ConnectionClosed),
            };

            match &result {
                Ok(res) => debug!("{} {} -> {} {}", method, url, res.status(), res.reason()),
                Err(e) => debug!("{} {} failed: {}", method, url, e),
            }

            done(result);
        });
    }

    fn schedule(&self, task: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { task() });
    }
}

impl Shared {
    async fn exchange(&self, request: PendingRequest) -> Result<ResponseView, Error> {
        let target = request.target().clone();
        let connect_timeout = self.config.get_connect_timeout();

        let tcp = timeout(
            connect_timeout,
            TcpStream::connect((target.host(), target.port())),
        )
        .await??;
        let _ = tcp.set_nodelay(true);

        if target.is_secure() {
            self.secure_call(tcp, request).await
        } else {
            run_call(tcp, request, &self.config).await
        }
    }

    #[cfg(feature = "tls")]
    async fn secure_call(
        &self,
        tcp: TcpStream,
        request: PendingRequest,
    ) -> Result<ResponseView, Error> {
        let host = request.target().host().to_string();
        let connecting = self.tls.connect(&host, tcp);
        let stream = timeout(self.config.get_connect_timeout(), connecting).await??;
        run_call(stream, request, &self.config).await
    }

    #[cfg(not(feature = "tls"))]
    async fn secure_call(
        &self,
        _tcp: TcpStream,
        _request: PendingRequest,
    ) -> Result<ResponseView, Error> {
        Err(Error::TlsUnavailable)
    }
}

/// Drive one [`Call`] over `stream` until the response is complete.
pub(crate) async fn run_call<S>(
    mut stream: S,
    request: PendingRequest,
    config: &ClientConfig,
) -> Result<ResponseView, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0; config.get_io_buffer_size()];

    let mut call = Call::new(request, config.get_user_agent())?;

    while !call.can_proceed() {
        let n = call.write(&mut buf)?;
        stream.write_all(&buf[..n]).await?;
    }

    let Some(next) = call.proceed() else {
        return Err(Error::OutputOverflow);
    };

    let (mut call, write_error) = match next {
        SendRequestResult::SendBody(call) => send_body(&mut stream, call, &mut buf).await?,
        SendRequestResult::RecvResponse(call) => (call, None),
    };

    if write_error.is_none() {
        stream.flush().await?;
    }

    let mut input: Vec<u8> = Vec::new();

    let response = loop {
        let (used, response) = call.try_response(&input)?;
        input.drain(..used);

        if let Some(r) = response {
            break r;
        }
        if used > 0 {
            continue;
        }

        // No response head. Report the failed body write, if there was one.
        match read_some(&mut stream, &mut buf, &mut input).await {
            Ok(0) => return Err(write_error.unwrap_or(Error::ConnectionClosed)),
            Ok(_) => {}
            Err(e) => return Err(write_error.unwrap_or(e)),
        }
    };

    let mut body = Vec::new();

    match call.proceed() {
        Some(RecvResponseResult::RecvBody(mut call)) => {
            let mut out = vec![0; config.get_io_buffer_size()];

            loop {
                if call.can_proceed() {
                    break;
                }

                if !input.is_empty() {
                    let (i, o) = call.read(&input, &mut out)?;
                    input.drain(..i);
                    body.extend_from_slice(&out[..o]);
                    if i > 0 {
                        continue;
                    }
                }

                let read = read_some(&mut stream, &mut buf, &mut input).await;

                // A server that cut the upload short may reset before the
                // body is complete. Keep the status and what we got.
                if write_error.is_some() && !matches!(read, Ok(n) if n > 0) {
                    debug!("Early response body cut short after {} bytes", body.len());
                    break;
                }

                if read? == 0 {
                    if call.is_close_delimited() {
                        break;
                    }
                    return Err(Error::ConnectionClosed);
                }
            }

            if let Some(cleanup) = call.proceed() {
                trace!("{:?} status {:?}", cleanup, cleanup.status());
            }
        }
        Some(RecvResponseResult::Cleanup(cleanup)) => {
            trace!("{:?} status {:?}", cleanup, cleanup.status());
        }
        None => return Err(Error::ConnectionClosed),
    }

    Ok(ResponseView::new(response, body))
}

/// Write the request body.
///
/// A server may answer before the body is complete, rejecting the upload,
/// and close the connection. The write then fails with a broken pipe or a
/// reset. That error is returned alongside the call so the response can
/// still be read.
async fn send_body<S>(
    stream: &mut S,
    mut call: Call<SendBody>,
    buf: &mut [u8],
) -> Result<(Call<RecvResponse>, Option<Error>), Error>
where
    S: AsyncWrite + Unpin,
{
    while !call.can_proceed() {
        let n = call.write(buf)?;

        if let Err(e) = stream.write_all(&buf[..n]).await {
            if !matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
                return Err(e.into());
            }
            debug!("Request body write failed, reading response: {}", e);
            return Ok((call.abandon(), Some(e.into())));
        }
    }

    let Some(call) = call.proceed() else {
        return Err(Error::OutputOverflow);
    };

    Ok((call, None))
}

/// Read once from `stream` and append to `input`. Returns 0 on end of stream.
async fn read_some<S>(stream: &mut S, buf: &mut [u8], input: &mut Vec<u8>) -> Result<usize, Error>
where
    S: AsyncRead + Unpin,
{
    let n = match stream.read(buf).await {
        Ok(n) => n,
        // TLS peers that close without close_notify.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => 0,
        Err(e) => return Err(e.into()),
    };
    input.extend_from_slice(&buf[..n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    use crate::dispatch::{ExchangeDispatcher, Outcome};
    use crate::request::{RequestFacade, Target};

    /// Accept one connection, read the request head, answer with `response`.
    async fn serve_once(response: &'static [u8]) -> (u16, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0_u8; 1024];
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            sock.write_all(response).await.unwrap();
            sock.shutdown().await.unwrap();
            let _ = tx.send(seen);
        });

        (port, rx)
    }

    fn client() -> Rc<LoopClient> {
        Rc::new(LoopClient::new(ClientConfig::default().user_agent(None)).unwrap())
    }

    #[tokio::test]
    async fn chunked_response_over_loopback() {
        LocalSet::new()
            .run_until(async {
                let (port, seen) = serve_once(
                    b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
                )
                .await;

                let target = Target::http("127.0.0.1").with_port(port);
                let mut req = RequestFacade::new(client(), target);
                req.put_request("GET", "/bucket/key");
                req.end_headers();

                let (tx, rx) = oneshot::channel();
                let called = Rc::new(Cell::new(false));
                let flag = called.clone();

                req.fetch_response(move |res| {
                    flag.set(true);
                    let _ = tx.send(res);
                });
                assert!(!called.get());

                let res = rx.await.unwrap().unwrap();
                assert_eq!(res.status(), 200);
                assert_eq!(res.body(), b"hello");

                let head = String::from_utf8(seen.await.unwrap()).unwrap();
                assert_eq!(
                    head,
                    format!("GET /bucket/key HTTP/1.1\r\nhost: 127.0.0.1:{}\r\n\r\n", port)
                );
            })
            .await;
    }

    #[tokio::test]
    async fn close_delimited_response() {
        LocalSet::new()
            .run_until(async {
                let (port, _seen) = serve_once(b"HTTP/1.0 404 Not Found\r\n\r\n<Error/>").await;

                let target = Target::http("127.0.0.1").with_port(port);
                let mut req = RequestFacade::new(client(), target);
                req.put_request("GET", "/missing");

                let (tx, rx) = oneshot::channel();
                req.fetch_response(move |res| {
                    let _ = tx.send(res);
                });

                let res = rx.await.unwrap().unwrap();
                assert_eq!(res.status(), 404);
                assert_eq!(res.reason(), "Not Found");
                assert_eq!(res.body(), b"<Error/>");
            })
            .await;
    }

    #[tokio::test]
    async fn early_response_to_large_upload_is_kept() {
        LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();

                // Answer after the head and close without reading the body.
                tokio::spawn(async move {
                    let (mut sock, _) = listener.accept().await.unwrap();
                    let mut seen = Vec::new();
                    let mut buf = [0_u8; 1024];
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        let n = sock.read(&mut buf).await.unwrap();
                        seen.extend_from_slice(&buf[..n]);
                    }
                    sock.write_all(
                        b"HTTP/1.1 503 Slow Down\r\ncontent-length: 8\r\n\r\n<SlowDn>",
                    )
                    .await
                    .unwrap();
                });

                let target = Target::http("127.0.0.1").with_port(port);
                let mut req = RequestFacade::new(client(), target);
                req.put_request("PUT", "/bucket/big");
                req.set_timeout(Duration::from_secs(10));
                req.send_vec(vec![0_u8; 32 * 1024 * 1024]);

                let (tx, rx) = oneshot::channel();
                ExchangeDispatcher::new(req)
                    .replayable(true)
                    .execute(move |outcome| {
                        let _ = tx.send(outcome);
                    });

                let Outcome::Retryable(res) = rx.await.unwrap() else {
                    panic!("Expected Retryable");
                };
                assert_eq!(res.status(), 503);
                assert_eq!(res.reason(), "Slow Down");
                assert_eq!(res.body(), b"<SlowDn>");
            })
            .await;
    }

    #[tokio::test]
    async fn request_timeout() {
        LocalSet::new()
            .run_until(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                tokio::spawn(async move {
                    let (_sock, _) = listener.accept().await.unwrap();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                });

                let target = Target::http("127.0.0.1").with_port(port);
                let mut req = RequestFacade::new(client(), target);
                req.set_timeout(Duration::from_millis(100));

                let (tx, rx) = oneshot::channel();
                req.fetch_response(move |res| {
                    let _ = tx.send(res);
                });

                assert_eq!(rx.await.unwrap().unwrap_err(), Error::Timeout);
            })
            .await;
    }

    #[tokio::test]
    async fn invalid_request_is_delivered_later() {
        LocalSet::new()
            .run_until(async {
                let mut req = RequestFacade::new(client(), Target::http("127.0.0.1"));
                req.put_header("bad\nname", "v");

                let (tx, rx) = oneshot::channel();
                let called = Rc::new(Cell::new(false));
                let flag = called.clone();
                req.fetch_response(move |res| {
                    flag.set(true);
                    let _ = tx.send(res);
                });
                assert!(!called.get());

                assert!(matches!(rx.await.unwrap(), Err(Error::BadHeader(_))));
            })
            .await;
    }

    #[tokio::test]
    async fn run_call_over_duplex() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let mut buf = vec![0_u8; 4096];
            let mut seen = Vec::new();
            while !seen.ends_with(b"0\r\n\r\n") {
                let n = server_io.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
            }
            server_io
                .write_all(b"HTTP/1.1 200 OK\r\nETag: \"x\"\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            seen
        });

        let mut req = RequestFacade::new(client_placeholder(), Target::http("s3.test"));
        req.put_request("PUT", "/b/k");
        req.send_framed(b"3\r\nabc\r\n0\r\n\r\n".to_vec());
        let pending = req.to_pending().unwrap();

        let config = ClientConfig::default().user_agent(None);
        let res = run_call(client_io, pending, &config).await.unwrap();
        assert_eq!(res.etag(), Some("\"x\""));

        let seen = server.await.unwrap();
        assert!(seen.ends_with(b"\r\n\r\n3\r\nabc\r\n0\r\n\r\n"));
    }

    fn client_placeholder() -> Rc<dyn Transport> {
        Rc::new(crate::test::ScriptedTransport::new())
    }
}
