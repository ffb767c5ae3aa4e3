// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Hold a WebSocket open, make calls over it and listen for downstream
//! messages published to this client's id. Expects a farcall server on
//! `ws://localhost:8787`.

use farcall::transport::WsTransport;
use farcall::{Client, call_args};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = WsTransport::builder("ws://localhost:8787")
        .binding("counter")
        .instance("demo")
        .client_id("example-client")
        .keep_alive(true)
        .allow_insecure()
        .build()?;
    let client = Client::new(transport);
    client.connect().await?;

    let mut downstream = client.downstream();

    let value = client.call("increment", call_args![]).await?;
    println!("incremented to {value:?}");

    println!("waiting for a downstream message for `example-client`…");
    if let Some(payload) = downstream.next().await {
        println!("downstream payload: {:?}", payload?);
    }

    client.close().await?;
    Ok(())
}
