//! Scripted switch side of an event socket for tests

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Read one command line sent by the client
pub async fn read_command(switch: &mut DuplexStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\n\n") {
        switch.read_exact(&mut byte).await.unwrap();
        buf.push(byte[0]);
    }
    String::from_utf8(buf).unwrap().trim_end().to_string()
}

pub async fn reply(switch: &mut DuplexStream, text: &str) {
    let frame = format!("Content-Type: command/reply\nReply-Text: {}\n\n", text);
    switch.write_all(frame.as_bytes()).await.unwrap();
}

/// Greeting, auth and subscription, accepting whatever is sent
pub async fn accept_handshake(switch: &mut DuplexStream) {
    switch
        .write_all(b"Content-Type: auth/request\n\n")
        .await
        .unwrap();
    read_command(switch).await;
    reply(switch, "+OK accepted").await;
    read_command(switch).await;
    reply(switch, "+OK event listener enabled plain").await;
}

/// Write `headers` as a `text/event-plain` frame
pub async fn send_event(switch: &mut DuplexStream, headers: &[(&str, &str)]) {
    let body: String = headers
        .iter()
        .map(|(k, v)| format!("{}: {}\n", k, urlencoding::encode(v)))
        .collect::<String>()
        + "\n";
    let frame = format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
        body.len(),
        body
    );
    switch.write_all(frame.as_bytes()).await.unwrap();
}
