use crate::support::{
    helpers::init_tracing,
    mock_rpc::{MockEvmChain, MockRpcServer},
};
use anyhow::Result;
use confirmwatch::{AsyncRpcClient, ChainProvider};

#[tokio::test]
async fn reads_head_and_block_timestamps() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(0x1f4);
    let server = MockRpcServer::start(chain.clone()).await?;
    let client = AsyncRpcClient::new(server.url())?;

    assert_eq!(client.get_block_number().await?, 500);
    assert_eq!(
        client.get_block_timestamp(500).await?,
        MockEvmChain::timestamp_of(500)
    );

    // Blocks past the head are reported as missing.
    let err = client.get_block_timestamp(501).await.unwrap_err();
    assert!(format!("{err:#}").contains("block 501"));

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.total_errors, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn receipt_appears_once_mined() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(100);
    let server = MockRpcServer::start(chain.clone()).await?;
    let client = AsyncRpcClient::new(server.url())?;
    let provider: &dyn ChainProvider = &client;

    assert_eq!(provider.transaction_receipt("0xabc").await?, None);

    chain.mine_with_status("0xabc", 101, 0);
    assert_eq!(provider.transaction_receipt("0xabc").await?, None);

    chain.set_head(101);
    let receipt = provider
        .transaction_receipt("0xabc")
        .await?
        .expect("receipt should be visible at the mined block");
    assert_eq!(receipt.block_number, 101);
    assert_eq!(receipt.transaction_hash, "0xabc");
    assert_eq!(receipt.status, Some(0));
    assert!(!receipt.succeeded());

    assert_eq!(chain.receipt_lookups("0xabc"), 3);
    assert_eq!(client.metrics().missing_receipts, 2);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn node_errors_surface_and_are_counted() -> Result<()> {
    init_tracing();
    let chain = MockEvmChain::new(10);
    let server = MockRpcServer::start(chain.clone()).await?;
    let client = AsyncRpcClient::new(server.url())?;

    chain.fail_next_receipt_calls(1);
    let err = client.get_transaction_receipt("0x01").await.unwrap_err();
    assert!(format!("{err:#}").contains("eth_getTransactionReceipt"));
    assert_eq!(client.get_transaction_receipt("0x01").await?, None);

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.total_errors, 1);
    assert!(metrics.error_rate > 0.0);

    server.shutdown().await;
    Ok(())
}
