use std::sync::Arc;
use std::time::Duration;

use mdrive_protocol::{IdleState, actions};
use serde_json::json;

use super::*;
use crate::transport::{ChannelPeer, ChannelTransport};

const SESSION_ID: &str = "a-session-id";

async fn connected_client(config: ClientConfig) -> (Arc<Client>, ChannelPeer) {
	let (parts, mut peer) = ChannelTransport::pair();
	let client = Arc::new(Client::new(config));

	let connecting = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.connect_with(parts).await })
	};

	let login = peer.recv().await.unwrap();
	assert_eq!(login.kind, actions::LOGIN);
	assert_eq!(login.params["sessionId"], SESSION_ID);
	assert_eq!(login.params["role"], "tester");
	peer.reply(actions::LOGIN_SUCCESS, json!({}), login.message_id.unwrap())
		.unwrap();

	connecting.await.unwrap().unwrap();
	(client, peer)
}

fn config() -> ClientConfig {
	ClientConfig::new("ws://localhost:8099", SESSION_ID)
}

/// Answers the next request, asserting its type.
async fn answer(peer: &mut ChannelPeer, expect: &str, kind: &str, params: serde_json::Value) {
	let request = peer.recv().await.unwrap();
	assert_eq!(request.kind, expect);
	peer.reply(kind, params, request.message_id.unwrap()).unwrap();
}

#[tokio::test]
async fn test_connect_logs_in() {
	let (client, _peer) = connected_client(config()).await;
	assert!(client.is_connected());
}

#[tokio::test]
async fn test_login_rejection_is_connection_failure() {
	let (parts, mut peer) = ChannelTransport::pair();
	let client = Arc::new(Client::new(config()));

	let connecting = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.connect_with(parts).await })
	};
	answer(&mut peer, actions::LOGIN, "loginFailed", json!({})).await;

	let result = connecting.await.unwrap();
	assert!(matches!(result, Err(Error::ConnectionFailed(_))));
	assert!(!client.is_connected());
}

#[tokio::test]
async fn test_actions_before_connect_fail() {
	let client = Client::new(config());
	assert!(matches!(
		client.wait_until_ready().await,
		Err(Error::NotConnected)
	));
	assert!(matches!(
		client.execute(json!({})).await,
		Err(Error::NotConnected)
	));
}

#[tokio::test]
async fn test_reload_react_native_expects_ready() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.reload_react_native().await })
	};
	answer(&mut peer, actions::RELOAD_REACT_NATIVE, actions::READY, json!({})).await;
	call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reload_react_native_with_wrong_type_is_mismatch() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.reload_react_native().await })
	};
	answer(&mut peer, actions::RELOAD_REACT_NATIVE, "somethingElse", json!({})).await;

	assert!(matches!(
		call.await.unwrap(),
		Err(Error::ProtocolMismatch { actual, .. }) if actual == "somethingElse"
	));
}

#[tokio::test]
async fn test_convenience_actions_expect_their_done_types() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move {
			client.deliver_payload(json!({"url": "app://x"})).await?;
			client.shake().await?;
			client.wait_for_active().await?;
			client.wait_for_background().await
		})
	};

	let request = peer.recv().await.unwrap();
	assert_eq!(request.kind, actions::DELIVER_PAYLOAD);
	assert_eq!(request.params["url"], "app://x");
	peer.reply(
		actions::DELIVER_PAYLOAD_DONE,
		json!({}),
		request.message_id.unwrap(),
	)
	.unwrap();
	answer(&mut peer, actions::SHAKE, actions::SHAKE_DEVICE_DONE, json!({})).await;
	answer(
		&mut peer,
		actions::WAIT_FOR_ACTIVE,
		actions::WAIT_FOR_ACTIVE_DONE,
		json!({}),
	)
	.await;
	answer(
		&mut peer,
		actions::WAIT_FOR_BACKGROUND,
		actions::WAIT_FOR_BACKGROUND_DONE,
		json!({}),
	)
	.await;

	call.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_execute_returns_invoke_result() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.execute(json!({"target": "x"})).await })
	};

	let request = peer.recv().await.unwrap();
	assert_eq!(request.kind, actions::INVOKE);
	assert_eq!(request.params["target"], "x");
	peer.reply(
		actions::INVOKE_RESULT,
		json!({"result": "(null)"}),
		request.message_id.unwrap(),
	)
	.unwrap();

	assert_eq!(call.await.unwrap().unwrap()["result"], "(null)");
}

#[tokio::test]
async fn test_execute_test_failed_is_assertion_failure() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.execute(json!({})).await })
	};
	answer(
		&mut peer,
		actions::INVOKE,
		actions::TEST_FAILED,
		json!({"details": "expected true, got false"}),
	)
	.await;

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_test_failure());
	assert!(err.to_string().contains("expected true, got false"));
}

#[tokio::test]
async fn test_execute_error_is_infrastructure_failure() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.execute(json!({})).await })
	};
	answer(
		&mut peer,
		actions::INVOKE,
		actions::ERROR,
		json!({"details": "this is an error"}),
	)
	.await;

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_infrastructure());
	assert!(matches!(err, Error::RemoteExecution { .. }));
}

#[tokio::test]
async fn test_wait_until_idle_returns_immediately_when_idle() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.wait_until_idle().await })
	};
	answer(
		&mut peer,
		actions::CURRENT_STATUS,
		actions::CURRENT_STATUS_RESULT,
		json!({"state": "idle"}),
	)
	.await;

	assert!(call.await.unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn test_wait_until_idle_reports_busy_resources_then_waits() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.wait_until_idle().await })
	};
	answer(
		&mut peer,
		actions::CURRENT_STATUS,
		actions::CURRENT_STATUS_RESULT,
		json!({"state": "busy", "resources": [{"name": "timers", "info": {}}]}),
	)
	.await;
	answer(&mut peer, actions::IS_READY, actions::READY, json!({})).await;

	let busy = call.await.unwrap().unwrap();
	assert_eq!(busy.len(), 1);
	assert_eq!(busy[0].name, "timers");
}

#[tokio::test(start_paused = true)]
async fn test_slow_invocation_queries_status_without_cancelling() {
	let config = config().with_slow_invocation_threshold(Duration::from_millis(3000));
	let (client, mut peer) = connected_client(config).await;
	let mut reports = client.status_reports();

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.execute(json!({"slow": true})).await })
	};

	let invoke = peer.recv().await.unwrap();
	assert_eq!(invoke.kind, actions::INVOKE);

	for _ in 0..2 {
		answer(
			&mut peer,
			actions::CURRENT_STATUS,
			actions::CURRENT_STATUS_RESULT,
			json!({"state": "busy", "resources": [{"name": "network", "info": {}}]}),
		)
		.await;
		let report = reports.recv().await.unwrap();
		assert_eq!(report.state, IdleState::Busy);
	}

	peer.reply(
		actions::INVOKE_RESULT,
		json!({"done": true}),
		invoke.message_id.unwrap(),
	)
	.unwrap();
	assert_eq!(call.await.unwrap().unwrap()["done"], true);
}

#[tokio::test(start_paused = true)]
async fn test_slow_invocation_watchdog_stops_when_channel_closes() {
	let config = config().with_slow_invocation_threshold(Duration::from_millis(100));
	let (client, mut peer) = connected_client(config).await;
	let mut reports = client.status_reports();

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.execute(json!({})).await })
	};
	let invoke = peer.recv().await.unwrap();
	assert_eq!(invoke.kind, actions::INVOKE);

	// Leave the status query unanswered and close under it.
	let status = peer.recv().await.unwrap();
	assert_eq!(status.kind, actions::CURRENT_STATUS);
	peer.hang_up();

	assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));
	tokio::time::sleep(Duration::from_millis(1000)).await;
	assert!(peer.recv().await.is_none());
	assert!(reports.try_recv().is_err());
	assert!(!client.is_connected());
}

#[tokio::test]
async fn test_pending_crash_is_kept_not_thrown() {
	let (client, peer) = connected_client(config()).await;

	peer.push(json!({
		"type": "AppWillTerminateWithError",
		"params": {"errorDetails": "someDetails"},
		"messageId": -10000
	}))
	.unwrap();

	let mut crash = None;
	for _ in 0..50 {
		crash = client.take_pending_crash();
		if crash.is_some() {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert_eq!(crash.as_deref(), Some("someDetails"));
	assert!(client.is_connected());
}

#[tokio::test]
async fn test_cleanup_sends_cleanup_and_closes() {
	let (client, mut peer) = connected_client(config()).await;

	let call = {
		let client = Arc::clone(&client);
		tokio::spawn(async move { client.cleanup().await })
	};

	let request = peer.recv().await.unwrap();
	assert_eq!(request.kind, actions::CLEANUP);
	assert_eq!(request.params["stopRunner"], true);
	peer.reply(actions::CLEANUP_DONE, json!({}), request.message_id.unwrap())
		.unwrap();

	call.await.unwrap().unwrap();
	assert!(!client.is_connected());
	assert!(peer.recv().await.is_none());
}

#[tokio::test]
async fn test_cleanup_without_connection_is_noop() {
	let client = Client::new(config());
	client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_cleanup_after_close_is_noop() {
	let (client, mut peer) = connected_client(config()).await;
	peer.hang_up();

	for _ in 0..50 {
		if !client.is_connected() {
			break;
		}
		tokio::task::yield_now().await;
	}
	assert!(!client.is_connected());
	client.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
	let client = Client::new(ClientConfig::new("ws://127.0.0.1:1", SESSION_ID));
	assert!(matches!(
		client.connect().await,
		Err(Error::ConnectionFailed(_))
	));
}
