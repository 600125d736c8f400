//! A one-shot local HTTP server for exercising the real reqwest paths.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

pub struct CannedResponse {
    status: u16,
    content_type: &'static str,
    chunks: Vec<Vec<u8>>,
    gate: Option<(oneshot::Receiver<()>, Vec<Vec<u8>>)>,
}

impl CannedResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            gate: None,
        }
    }

    /// A chunked body delivered one write per element.
    pub fn streaming(content_type: &'static str, chunks: &[&[u8]]) -> Self {
        Self {
            status: 200,
            content_type,
            chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
            gate: None,
        }
    }

    /// Hold the connection open after the initial chunks until `gate` fires,
    /// then send `tail`.
    pub fn then_wait(mut self, gate: oneshot::Receiver<()>, tail: &[&[u8]]) -> Self {
        self.gate = Some((gate, tail.iter().map(|chunk| chunk.to_vec()).collect()));
        self
    }
}

pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

pub struct TestServer {
    addr: SocketAddr,
    captured: oneshot::Receiver<CapturedRequest>,
    written: oneshot::Receiver<()>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn request(self) -> CapturedRequest {
        self.captured.await.expect("server saw no request")
    }

    /// Wait until the server has finished writing the response, tail
    /// included.
    pub async fn response_written(&mut self) {
        (&mut self.written).await.expect("server wrote no response");
    }
}

/// Accept a single connection and answer it with `response`.
pub async fn serve_once(response: CannedResponse) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let (captured_tx, captured) = oneshot::channel();
    let (written_tx, written) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(request) = read_http_request(&mut stream).await else {
            return;
        };
        let _ = captured_tx.send(request);
        // A client that hung up early makes the tail write fail; either way
        // the server is done.
        let _ = write_response(&mut stream, response).await;
        let _ = written_tx.send(());
    });

    TestServer {
        addr,
        captured,
        written,
    }
}

async fn write_response(stream: &mut TcpStream, response: CannedResponse) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status,
        if response.status < 400 { "OK" } else { "Error" },
        response.content_type,
    );
    stream.write_all(head.as_bytes()).await?;

    for chunk in &response.chunks {
        write_chunk(stream, chunk).await?;
    }
    if let Some((gate, tail)) = response.gate {
        if gate.await.is_err() {
            return Ok(());
        }
        for chunk in &tail {
            write_chunk(stream, chunk).await?;
        }
    }
    stream.write_all(b"0\r\n\r\n").await?;
    stream.flush().await
}

async fn write_chunk(stream: &mut TcpStream, chunk: &[u8]) -> std::io::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    stream
        .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
        .await?;
    stream.write_all(chunk).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.ok_or("Missing header terminator")?;
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().map_err(|_| "Bad Content-Length")?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}
