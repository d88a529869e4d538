//! Minimal SMTP listener: accepts every message and hands it to the imposter.

use crate::imposter::Imposter;
use crate::request::Request;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, PartialEq)]
enum Command {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    Unknown,
}

impl Command {
    fn parse(line: &str) -> Self {
        let upper = line.to_ascii_uppercase();
        let argument = |prefix: &str| {
            line[prefix.len()..]
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        };
        if upper.starts_with("EHLO") {
            Command::Ehlo(argument("EHLO"))
        } else if upper.starts_with("HELO") {
            Command::Helo(argument("HELO"))
        } else if upper.starts_with("MAIL FROM:") {
            Command::MailFrom(argument("MAIL FROM:"))
        } else if upper.starts_with("RCPT TO:") {
            Command::RcptTo(argument("RCPT TO:"))
        } else {
            match upper.as_str() {
                "DATA" => Command::Data,
                "RSET" => Command::Rset,
                "NOOP" => Command::Noop,
                "QUIT" => Command::Quit,
                _ => Command::Unknown,
            }
        }
    }
}

/// Envelope collected between `MAIL FROM` and the end of `DATA`.
#[derive(Debug, Default)]
struct Envelope {
    from: String,
    to: Vec<String>,
}

/// Request fields parsed from a message.
fn message_request(request_from: &str, envelope: &Envelope, message: &str) -> Request {
    let (head, text) = message
        .split_once("\r\n\r\n")
        .or_else(|| message.split_once("\n\n"))
        .unwrap_or((message, ""));

    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    };
    let addresses = |value: Option<String>| -> Vec<Value> {
        value
            .map(|v| {
                v.split(',')
                    .map(|a| json!(a.trim()))
                    .filter(|a| a != &json!(""))
                    .collect()
            })
            .unwrap_or_default()
    };

    let to = match addresses(header("to")) {
        to if to.is_empty() => envelope.to.iter().map(|a| json!(a)).collect(),
        to => to,
    };

    let mut request = Request {
        request_from: request_from.to_string(),
        ..Default::default()
    };
    let fields = [
        ("envelopeFrom", json!(envelope.from)),
        ("envelopeTo", json!(envelope.to)),
        ("from", json!(header("from").unwrap_or_else(|| envelope.from.clone()))),
        ("to", Value::Array(to)),
        ("cc", Value::Array(addresses(header("cc")))),
        ("subject", json!(header("subject").unwrap_or_default())),
        ("text", json!(text.trim_end())),
    ];
    for (name, value) in fields {
        request.extra.insert(name.to_string(), value);
    }
    request
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Message body up to the lone `.` line, with dot-stuffing removed.
async fn read_data<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut data = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(data);
        }
        if line == ".\r\n" || line == ".\n" {
            return Ok(data);
        }
        let content = line.strip_prefix('.').filter(|l| l.starts_with('.')).unwrap_or(&line);
        data.push_str(content);
    }
}

pub(super) async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    imposter: Arc<Imposter>,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    run_session(BufReader::new(reader), writer, addr.to_string(), imposter).await
}

async fn run_session<R, W>(
    mut reader: BufReader<R>,
    mut writer: W,
    request_from: String,
    imposter: Arc<Imposter>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    reply(&mut writer, "220 decoy SMTP ready").await?;
    let mut envelope = Envelope::default();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        match Command::parse(line.trim_end()) {
            Command::Helo(domain) | Command::Ehlo(domain) => {
                debug!("SMTP greeting from {}", domain);
                reply(&mut writer, "250 decoy").await?;
            }
            Command::MailFrom(from) => {
                envelope = Envelope {
                    from,
                    to: Vec::new(),
                };
                reply(&mut writer, "250 OK").await?;
            }
            Command::RcptTo(to) => {
                envelope.to.push(to);
                reply(&mut writer, "250 OK").await?;
            }
            Command::Data => {
                reply(&mut writer, "354 End data with <CR><LF>.<CR><LF>").await?;
                let message = read_data(&mut reader).await?;
                let request = message_request(&request_from, &envelope, &message);
                if let Err(e) = imposter.handle(request).await {
                    warn!("SMTP request to imposter {} failed: {}", imposter.port(), e);
                }
                envelope = Envelope::default();
                reply(&mut writer, "250 OK: message accepted").await?;
            }
            Command::Rset => {
                envelope = Envelope::default();
                reply(&mut writer, "250 OK").await?;
            }
            Command::Noop => reply(&mut writer, "250 OK").await?,
            Command::Quit => {
                reply(&mut writer, "221 Bye").await?;
                return Ok(());
            }
            Command::Unknown => reply(&mut writer, "502 Command not implemented").await?,
        }
    }
}
