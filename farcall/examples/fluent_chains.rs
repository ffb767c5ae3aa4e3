// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Record chains against a remote host and let the batcher coalesce
//! them. Expects a farcall server on `http://localhost:8787` exposing a
//! counter host (`increment`, `add`).

use farcall::transport::HttpTransport;
use farcall::{Client, call_args};
use std::future::IntoFuture;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = HttpTransport::builder("http://localhost:8787")
        .binding("counter")
        .instance("demo")
        .allow_insecure()
        .build()?;
    let client = Client::new(transport);

    // These three calls are queued together and travel as one batch.
    let a = client.call("increment", call_args![]);
    let b = client.call("increment", call_args![]);
    let c = client.call("increment", call_args![]);
    let (a, b, c) = futures::join!(a.into_future(), b.into_future(), c.into_future());
    println!("three increments in one round-trip: {:?} {:?} {:?}", a?, b?, c?);

    // Pipelining: the increments never come back to us; the server
    // feeds their results straight into add.
    let sum = client
        .call(
            "add",
            call_args![
                client.call("increment", call_args![]),
                client.call("increment", call_args![])
            ],
        )
        .await?;
    println!("pipelined sum: {sum:?}");

    Ok(())
}
