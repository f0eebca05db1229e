use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::util::RingBytes;

#[derive(Debug)]
pub struct LineTap {
    pub line: String,
    pub stream: LineStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStream {
    Stdout,
    Stderr,
}

pub fn pump_stdout<R>(rd: R, line_tx: mpsc::Sender<LineTap>) -> JoinHandle<std::io::Result<u64>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    pump(rd, None, line_tx, LineStream::Stdout)
}

/// Stderr is also split on `\r`, which git uses to redraw progress lines,
/// and captured into `ring` for failure messages.
pub fn pump_stderr<R>(
    rd: R,
    ring: Arc<RingBytes>,
    line_tx: mpsc::Sender<LineTap>,
) -> JoinHandle<std::io::Result<u64>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    pump(rd, Some(ring), line_tx, LineStream::Stderr)
}

fn pump<R>(
    mut rd: R,
    ring: Option<Arc<RingBytes>>,
    line_tx: mpsc::Sender<LineTap>,
    stream: LineStream,
) -> JoinHandle<std::io::Result<u64>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let split_cr = stream == LineStream::Stderr;
    tokio::spawn(async move {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        let mut line_buf: Vec<u8> = Vec::with_capacity(8 * 1024);

        loop {
            let n = rd.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if let Some(ring) = ring.as_ref() {
                ring.push(&buf[..n]);
            }
            total += n as u64;

            line_buf.extend_from_slice(&buf[..n]);
            while let Some(pos) = line_buf
                .iter()
                .position(|&b| b == b'\n' || (split_cr && b == b'\r'))
            {
                let mut one = line_buf.drain(..=pos).collect::<Vec<u8>>();
                trim_newline(&mut one);
                if split_cr && one.is_empty() {
                    continue;
                }
                let line = String::from_utf8_lossy(&one).to_string();
                if line_tx.send(LineTap { line, stream }).await.is_err() {
                    return Ok(total);
                }
            }
        }

        // EOF flush: deliver the last partial line if it doesn't end with '\n'.
        if !line_buf.is_empty() {
            trim_newline(&mut line_buf);
            if !line_buf.is_empty() {
                let line = String::from_utf8_lossy(&line_buf).to_string();
                let _ = line_tx.send(LineTap { line, stream }).await;
            }
        }

        Ok(total)
    })
}

fn trim_newline(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
}
