//! Stream - exchanging data with a remote serial port.
//!
//! This example demonstrates:
//! - Writing data with `write` and waiting for TX_CONFIRM
//! - Reading what the device sends through `take_incoming`
//! - Keeping an idle session alive with `keep_alive`
//!
//! # Running
//!
//! ```text
//! cargo run --example stream -- 192.168.1.20:7000 COM5
//! ```

use std::time::Duration;

use serialwire_client::Connection;
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7000".to_string());
    let port = args.next().unwrap_or_else(|| "COM1".to_string());

    let conn = Connection::builder()
        .confirm_timeout(Duration::from_secs(10))
        .connect(TcpStream::connect(&addr).await?)?;

    if !conn.open_port(&port, 115_200).await? {
        return Err(format!("could not open {}", port).into());
    }
    let mut incoming = conn
        .take_incoming(&port)
        .ok_or("incoming data already taken")?;

    let delivery = conn.write(&port, b"AT\r\n").await?;
    println!("written, transaction {}", delivery.txid);

    // Print replies for a few seconds, pinging the port while it is quiet
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            data = incoming.recv() => match data {
                Some(data) => println!("{}: {:?}", port, String::from_utf8_lossy(&data)),
                None => break,
            },
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                conn.keep_alive(&port).await?;
            }
            _ = &mut deadline => break,
        }
    }

    for error in conn.take_stream_errors(&port) {
        eprintln!("stream error: {}", error);
    }

    conn.close_port(&port).await?;
    conn.close().await;
    Ok(())
}
