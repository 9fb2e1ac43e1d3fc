//! Open / Close - the port lifecycle handshake.
//!
//! This example demonstrates:
//! - Connecting to a serial tunnel server over TCP
//! - Opening a remote port with `open_port`
//! - Listing open ports and closing them again
//!
//! # Running
//!
//! ```text
//! cargo run --example open_close -- 192.168.1.20:7000 COM5 115200
//! ```

use serialwire_client::Connection;
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7000".to_string());
    let port = args.next().unwrap_or_else(|| "COM1".to_string());
    let baud: u32 = args.next().map(|b| b.parse::<u32>()).transpose()?.unwrap_or(9600);

    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;

    let conn = Connection::builder()
        .on_remote_error(|error| eprintln!("server error: {}", error))
        .connect(stream)?;

    if !conn.open_port(&port, baud).await? {
        eprintln!("server refused to open {}", port);
        conn.close().await;
        return Ok(());
    }
    println!("open ports: {:?}", conn.open_ports());

    conn.close_port(&port).await?;
    println!("{} closed, open ports: {:?}", port, conn.open_ports());

    conn.close().await;
    Ok(())
}
