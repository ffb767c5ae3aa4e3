// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Build a host object, stand up the batch service and feed it an
//! encoded batch directly, the same way an HTTP adapter would.

use farcall_core::{BatchItem, BatchRequest, Op, OpChain, codec};
use farcall_server::{HostObject, HostValue, RpcService};
use std::cell::Cell;
use std::rc::Rc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let count = Rc::new(Cell::new(0));
    let host = HostObject::new()
        .value("name", "demo counter")
        .method("increment", move |_, _| {
            let count = count.clone();
            async move {
                count.set(count.get() + 1);
                Ok(HostValue::data(count.get() as f64))
            }
        })
        .build();
    let service = RpcService::new(host);

    let request = BatchRequest {
        batch: vec![
            BatchItem {
                id: "1".into(),
                operations: OpChain::from_ops(vec![Op::get("increment"), Op::apply(vec![])]),
            },
            BatchItem {
                id: "2".into(),
                operations: OpChain::from_ops(vec![Op::get("name")]),
            },
        ],
    };
    let body = codec::encode_request(&request)?;

    let reply = service.handle_call(&body).await;
    println!("status: {}", reply.status);
    println!("body:   {}", reply.body);
    Ok(())
}
