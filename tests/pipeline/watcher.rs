use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{
        init_tracing, now_millis, wait_for_checkpoint, wait_for_receipt, wait_for_removal,
    },
    mock_rpc::{MockEvmChain, MockRpcServer},
};
use anyhow::Result;
use confirmwatch::{
    AsyncRpcClient, ChainContext, ChainHead, ChainProvider, ManualClock, PendingTransaction,
    PendingTransactionPoller, ReceiptFetcher, RetryOptions, RetryPolicy, SinkWriter, StateSink,
    Telemetry, TickContext, TickReport, TransactionStore, TransactionWatcher, WatcherConfig,
    DEFAULT_MAX_PENDING_AGE,
};
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(policy: RetryPolicy) -> WatcherConfig {
    WatcherConfig::builder()
        .retry_policy(policy)
        .block_refresh_interval(Duration::from_millis(25))
        .build()
        .expect("config should build")
}

fn context(chain_id: u64, provider: Arc<dyn ChainProvider>, account: Option<&str>) -> ChainContext {
    ChainContext {
        chain_id,
        account: account.map(str::to_owned),
        provider,
    }
}

/// Drives the poller tick by tick: unmined at block 100, mined in block 101.
#[tokio::test]
async fn checkpoint_then_confirm_across_two_blocks() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(100);
    let server = MockRpcServer::start(chain.clone()).await?;
    let provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(server.url())?);

    let now = now_millis();
    let store = Arc::new(TransactionStore::new());
    store.insert(PendingTransaction::new("0xfeed", 1, now));

    let telemetry = Arc::new(Telemetry::default());
    let sink: Arc<dyn StateSink> = store.clone();
    let (sink_handle, writer) = SinkWriter::spawn(sink, 16, telemetry.clone());
    let clock = Arc::new(ManualClock::new(now));
    let head = Arc::new(ChainHead::new());
    head.advance(100);

    let fetcher = ReceiptFetcher::new(
        Arc::new(RetryPolicy::empty()),
        sink_handle.clone(),
        clock.clone(),
        DEFAULT_MAX_PENDING_AGE,
    );
    let mut poller = PendingTransactionPoller::new(
        fetcher,
        sink_handle,
        head.clone(),
        telemetry.clone(),
        clock.clone(),
    );

    let tick = |latest_block| TickContext {
        chain_id: Some(1),
        provider: Some(provider.clone()),
        latest_block: Some(latest_block),
        block_timestamp: Some(MockEvmChain::timestamp_of(latest_block)),
        account: Some("0xacc".into()),
    };

    let report = poller.tick(tick(100), &store.pending_for_chain(1));
    assert_eq!(
        report,
        TickReport::Dispatched {
            selected: 1,
            cancelled: 0
        }
    );
    wait_for_checkpoint(&store, "0xfeed", 100, WAIT).await?;
    assert!(store.get("0xfeed").unwrap().receipt.is_none());

    chain.mine("0xfeed", 101);
    chain.set_head(101);
    clock.advance(Duration::from_secs(2));

    let report = poller.tick(tick(101), &store.pending_for_chain(1));
    assert!(matches!(report, TickReport::Dispatched { selected: 1, .. }));
    wait_for_receipt(&store, "0xfeed", WAIT).await?;

    let tx = store.get("0xfeed").unwrap();
    assert_eq!(tx.receipt.as_ref().map(|receipt| receipt.block_number), Some(101));
    assert_eq!(head.current(), Some(101));
    assert_eq!(chain.receipt_lookups("0xfeed"), 2);

    // Nothing left to poll once confirmed.
    let report = poller.tick(tick(102), &store.pending_for_chain(1));
    assert!(matches!(report, TickReport::Skipped(_)));

    poller.shutdown().await;
    drop(poller);
    writer.await?;
    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.confirmations, 1);
    assert_eq!(snapshot.checkpoints, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn watcher_follows_the_chain_head() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(100);
    let server = MockRpcServer::start(chain.clone()).await?;
    let provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(server.url())?);

    let store = Arc::new(TransactionStore::new());
    store.insert(PendingTransaction::new("0xbeef", 1, now_millis()));

    let (_context_tx, context_rx) = watch::channel(Some(context(1, provider, Some("0xacc"))));
    let mut watcher = TransactionWatcher::new(fast_config(RetryPolicy::empty()), store.clone(), context_rx);
    watcher.start().await?;

    wait_for_checkpoint(&store, "0xbeef", 100, WAIT).await?;

    chain.mine("0xbeef", 101);
    chain.set_head(101);
    wait_for_receipt(&store, "0xbeef", WAIT).await?;
    assert_eq!(watcher.head().current(), Some(101));
    assert_eq!(
        watcher.head().snapshot().timestamp,
        Some(MockEvmChain::timestamp_of(101))
    );

    watcher.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn transactions_past_their_deadline_are_removed() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(50);
    let server = MockRpcServer::start(chain.clone()).await?;
    let provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(server.url())?);

    let store = Arc::new(TransactionStore::new());
    let expired_deadline = MockEvmChain::timestamp_of(50) - 1;
    store.insert(PendingTransaction::new("0xlate", 1, now_millis()).with_deadline(expired_deadline));
    store.insert(
        PendingTransaction::new("0xfresh", 1, now_millis())
            .with_deadline(MockEvmChain::timestamp_of(50) + 600),
    );

    let (_context_tx, context_rx) = watch::channel(Some(context(1, provider, Some("0xacc"))));
    let mut watcher = TransactionWatcher::new(fast_config(RetryPolicy::empty()), store.clone(), context_rx);
    watcher.start().await?;

    wait_for_removal(&store, "0xlate", WAIT).await?;
    wait_for_checkpoint(&store, "0xfresh", 50, WAIT).await?;

    watcher.stop().await?;
    assert!(watcher.telemetry().snapshot().removals >= 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn expired_transactions_stay_without_an_account() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(50);
    let server = MockRpcServer::start(chain.clone()).await?;
    let provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(server.url())?);

    let store = Arc::new(TransactionStore::new());
    store.insert(PendingTransaction::new("0xold", 1, now_millis()).with_deadline(1));

    let (_context_tx, context_rx) = watch::channel(Some(context(1, provider, None)));
    let mut watcher = TransactionWatcher::new(fast_config(RetryPolicy::empty()), store.clone(), context_rx);
    watcher.start().await?;

    wait_for_checkpoint(&store, "0xold", 50, WAIT).await?;
    assert!(store.get("0xold").is_some());

    watcher.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn node_errors_are_retried_within_a_tick() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(20);
    chain.mine("0xflaky", 20);
    chain.fail_next_receipt_calls(2);
    let server = MockRpcServer::start(chain.clone()).await?;
    let provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(server.url())?);

    let store = Arc::new(TransactionStore::new());
    store.insert(PendingTransaction::new("0xflaky", 7, now_millis()));

    let policy = RetryPolicy::empty().with_chain(
        7,
        RetryOptions::new(5, Duration::from_millis(10), Duration::from_millis(40)),
    );
    let (_context_tx, context_rx) = watch::channel(Some(context(7, provider, None)));
    let mut watcher = TransactionWatcher::new(fast_config(policy), store.clone(), context_rx);
    watcher.start().await?;

    wait_for_receipt(&store, "0xflaky", WAIT).await?;
    // The receipt was found without a checkpoint in between.
    assert_eq!(store.get("0xflaky").unwrap().last_checked_block_number, None);

    watcher.stop().await?;
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn switching_chains_polls_the_new_chain_only() -> Result<()> {
    init_tracing();
    let first = MockEvmChain::new(10);
    let second = MockEvmChain::new(900);
    second.mine("0xsecond", 899);
    let first_server = MockRpcServer::start(first.clone()).await?;
    let second_server = MockRpcServer::start(second.clone()).await?;
    let first_provider: Arc<dyn ChainProvider> = Arc::new(AsyncRpcClient::new(first_server.url())?);
    let second_provider: Arc<dyn ChainProvider> =
        Arc::new(AsyncRpcClient::new(second_server.url())?);

    let store = Arc::new(TransactionStore::new());
    store.insert(PendingTransaction::new("0xfirst", 1, now_millis()));
    store.insert(PendingTransaction::new("0xsecond", 2, now_millis()));

    let (context_tx, context_rx) = watch::channel(Some(context(1, first_provider, None)));
    let mut watcher = TransactionWatcher::new(fast_config(RetryPolicy::empty()), store.clone(), context_rx);
    watcher.start().await?;

    wait_for_checkpoint(&store, "0xfirst", 10, WAIT).await?;
    assert_eq!(first.receipt_lookups("0xsecond"), 0);

    context_tx.send(Some(context(2, second_provider, None)))?;
    wait_for_receipt(&store, "0xsecond", WAIT).await?;
    assert_eq!(watcher.head().current(), Some(900));
    assert_eq!(second.receipt_lookups("0xfirst"), 0);

    watcher.stop().await?;
    first_server.shutdown().await;
    second_server.shutdown().await;
    Ok(())
}
