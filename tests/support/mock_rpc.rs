use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Seconds of block time on the mock chain; block `n` is stamped
/// `GENESIS_TIMESTAMP + n * BLOCK_TIME_SECS`.
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const BLOCK_TIME_SECS: u64 = 2;

#[derive(Clone, Copy)]
struct MinedTransaction {
    block_number: u64,
    status: u64,
}

/// In-memory EVM node. Receipts only become visible once the head has
/// reached the block they were mined in.
#[derive(Clone, Default)]
pub struct MockEvmChain {
    head: Arc<AtomicU64>,
    mined: Arc<RwLock<HashMap<String, MinedTransaction>>>,
    receipt_lookups: Arc<RwLock<HashMap<String, usize>>>,
    failing_receipt_calls: Arc<AtomicUsize>,
}

impl MockEvmChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        chain
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn mine(&self, hash: &str, block_number: u64) {
        self.mine_with_status(hash, block_number, 1);
    }

    pub fn mine_with_status(&self, hash: &str, block_number: u64, status: u64) {
        self.mined.write().expect("mock chain poisoned").insert(
            hash.to_owned(),
            MinedTransaction {
                block_number,
                status,
            },
        );
    }

    /// Makes the next `count` receipt requests fail with a JSON-RPC error.
    pub fn fail_next_receipt_calls(&self, count: usize) {
        self.failing_receipt_calls.store(count, Ordering::SeqCst);
    }

    pub fn receipt_lookups(&self, hash: &str) -> usize {
        self.receipt_lookups
            .read()
            .expect("mock chain poisoned")
            .get(hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn timestamp_of(block_number: u64) -> u64 {
        GENESIS_TIMESTAMP + block_number * BLOCK_TIME_SECS
    }

    fn receipt(&self, hash: &str) -> Option<Value> {
        *self
            .receipt_lookups
            .write()
            .expect("mock chain poisoned")
            .entry(hash.to_owned())
            .or_default() += 1;

        let mined = self
            .mined
            .read()
            .expect("mock chain poisoned")
            .get(hash)
            .copied()?;
        if mined.block_number > self.head() {
            return None;
        }

        Some(json!({
            "blockHash": format!("0x{:064x}", mined.block_number),
            "blockNumber": quantity(mined.block_number),
            "contractAddress": null,
            "cumulativeGasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "from": "0x00000000000000000000000000000000000000aa",
            "gasUsed": "0x5208",
            "logs": [],
            "status": quantity(mined.status),
            "to": "0x00000000000000000000000000000000000000bb",
            "transactionHash": hash,
            "transactionIndex": "0x0",
            "type": "0x2",
        }))
    }

    fn take_receipt_failure(&self) -> bool {
        self.failing_receipt_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockEvmChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    chain: MockEvmChain,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = handle_call(&chain, payload);
    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockEvmChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let first_param = call
        .get("params")
        .and_then(Value::as_array)
        .and_then(|params| params.first())
        .cloned();

    match method.as_str() {
        "eth_blockNumber" => success(id, Value::String(quantity(chain.head()))),
        "eth_getBlockByNumber" => {
            let number = first_param
                .as_ref()
                .and_then(Value::as_str)
                .and_then(|raw| u64::from_str_radix(raw.trim_start_matches("0x"), 16).ok());
            match number {
                Some(number) if number <= chain.head() => success(
                    id,
                    json!({
                        "number": quantity(number),
                        "hash": format!("0x{number:064x}"),
                        "timestamp": quantity(MockEvmChain::timestamp_of(number)),
                    }),
                ),
                Some(_) => success(id, Value::Null),
                None => error(id, -32602, "invalid block number"),
            }
        }
        "eth_getTransactionReceipt" => {
            if chain.take_receipt_failure() {
                return error(id, -32000, "header not found");
            }
            let Some(hash) = first_param.as_ref().and_then(Value::as_str) else {
                return error(id, -32602, "missing transaction hash");
            };
            success(id, chain.receipt(hash).unwrap_or(Value::Null))
        }
        _ => error(id, -32601, format!("the method {method} does not exist")),
    }
}

fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
