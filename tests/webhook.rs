mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::CaptureServer;
use event_relay::{
    Sink, SinkError, SubscriptionRouter, SubscriptionTarget, WebhookFilter, WebhookSink,
    test_utils::{TOKEN, sample_event},
};
use reqwest::Url;

#[tokio::test]
async fn posts_event_type_and_argument_data() -> anyhow::Result<()> {
    let mut server = CaptureServer::start().await?;
    let sink = WebhookSink::new("ops", Url::parse(&server.url("/hook"))?);
    let event = sample_event(12, 3);

    sink.notify(&event).await?;

    let request = server.next().await;
    assert_eq!(request.path, "/hook");
    let body = request.body;
    assert_eq!(body["event_type"], "Transfer");
    let data = &body["data"];
    assert_eq!(data["value"], "42");
    let from = event.args.get("from").map(|value| value.render()).unwrap_or_default();
    assert_eq!(data["from"], from);
    assert!(data.get("block_number").is_none());
    assert_eq!(body["chain_id"], 1);
    assert_eq!(body["block_number"], 12);
    assert_eq!(body["log_index"], 3);
    assert_eq!(body["tx_hash"], event.tx_hash.to_string());
    assert!(body.get("display").is_none());
    Ok(())
}

#[tokio::test]
async fn non_success_status_is_a_failure() -> anyhow::Result<()> {
    let mut server = CaptureServer::start().await?;
    server.respond_with(StatusCode::INTERNAL_SERVER_ERROR);
    let sink = WebhookSink::new("ops", Url::parse(&server.url("/hook"))?);

    let err = sink.notify(&sample_event(1, 0)).await.expect_err("500 must fail");

    assert!(matches!(err, SinkError::Status(status) if status.as_u16() == 500));
    server.next().await;
    Ok(())
}

#[tokio::test]
async fn router_counts_filtered_and_failed_webhooks() -> anyhow::Result<()> {
    let mut server = CaptureServer::start().await?;
    let url = Url::parse(&server.url("/hook"))?;
    let event = sample_event(7, 0);
    let target = SubscriptionTarget::Source(event.source_id());

    let router = SubscriptionRouter::default();
    let only_approvals =
        WebhookFilter { event_types: Some(vec!["Approval".into()]), ..WebhookFilter::default() };
    router.subscribe(target.clone(), Arc::new(WebhookSink::new("delivered", url.clone())))?;
    router.subscribe(
        target.clone(),
        Arc::new(WebhookSink::new("approvals", url).filter(only_approvals)),
    )?;
    let unreachable = Url::parse("http://127.0.0.1:9/hook")?;
    router.subscribe(target, Arc::new(WebhookSink::new("down", unreachable)))?;

    let outcome = router.dispatch(&event).await;

    assert_eq!((outcome.delivered, outcome.skipped, outcome.failed), (1, 1, 1));
    let counters = router.counters();
    assert_eq!(counters.dispatched, 1);
    assert_eq!(counters.delivered, 1);
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.failed, 1);

    assert_eq!(server.next().await.body["block_number"], 7);
    assert!(server.try_next().is_none());
    assert_eq!(event.contract_address, TOKEN);
    Ok(())
}
