use std::sync::Arc;
use std::time::Duration;

use mdrive_protocol::actions;
use serde_json::json;

use super::*;
use crate::transport::{ChannelPeer, ChannelTransport};

fn create_test_connection() -> (Arc<Connection>, ChannelPeer) {
	let (parts, peer) = ChannelTransport::pair();
	(Arc::new(Connection::new(parts)), peer)
}

fn spawn_run(connection: &Arc<Connection>) -> tokio::task::JoinHandle<Result<()>> {
	let connection = Arc::clone(connection);
	tokio::spawn(async move { connection.run().await })
}

#[test]
fn test_message_id_starts_at_one_and_increments() {
	let (connection, _) = create_test_connection();

	let id1 = connection.last_id.fetch_add(1, Ordering::SeqCst) + 1;
	let id2 = connection.last_id.fetch_add(1, Ordering::SeqCst) + 1;

	assert_eq!(id1, 1);
	assert_eq!(id2, 2);
}

#[tokio::test]
async fn test_response_resolves_matching_request() {
	let (connection, mut peer) = create_test_connection();
	let run = spawn_run(&connection);

	let sender = Arc::clone(&connection);
	let request = tokio::spawn(async move {
		sender
			.send(actions::IS_READY, json!({}), &[actions::READY])
			.await
	});

	let sent = peer.recv().await.unwrap();
	assert_eq!(sent.kind, actions::IS_READY);
	peer.reply(actions::READY, json!({}), sent.message_id.unwrap()).unwrap();

	let response = request.await.unwrap().unwrap();
	assert_eq!(response.kind, actions::READY);
	assert_eq!(connection.pending_count(), 0);

	connection.close();
	run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_out_of_order_responses_are_matched_by_id() {
	let (connection, mut peer) = create_test_connection();
	let run = spawn_run(&connection);

	let first = {
		let c = Arc::clone(&connection);
		tokio::spawn(async move {
			c.send(actions::INVOKE, json!({"n": 1}), &[actions::INVOKE_RESULT])
				.await
		})
	};
	let first_sent = peer.recv().await.unwrap();

	let second = {
		let c = Arc::clone(&connection);
		tokio::spawn(async move {
			c.send(actions::INVOKE, json!({"n": 2}), &[actions::INVOKE_RESULT])
				.await
		})
	};
	let second_sent = peer.recv().await.unwrap();
	assert_ne!(first_sent.message_id, second_sent.message_id);

	peer.reply(
		actions::INVOKE_RESULT,
		json!({"result": "second"}),
		second_sent.message_id.unwrap(),
	)
	.unwrap();
	peer.reply(
		actions::INVOKE_RESULT,
		json!({"result": "first"}),
		first_sent.message_id.unwrap(),
	)
	.unwrap();

	assert_eq!(first.await.unwrap().unwrap().params["result"], "first");
	assert_eq!(second.await.unwrap().unwrap().params["result"], "second");

	connection.close();
	run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unexpected_type_rejects_with_mismatch() {
	let (connection, mut peer) = create_test_connection();
	let run = spawn_run(&connection);

	let c = Arc::clone(&connection);
	let request = tokio::spawn(async move {
		c.send(actions::RELOAD_REACT_NATIVE, json!({}), &[actions::READY])
			.await
	});

	let sent = peer.recv().await.unwrap();
	peer.reply("somethingElse", json!({"why": "because"}), sent.message_id.unwrap())
		.unwrap();

	match request.await.unwrap() {
		Err(Error::ProtocolMismatch {
			expected,
			actual,
			params,
		}) => {
			assert_eq!(expected, vec!["ready".to_string()]);
			assert_eq!(actual, "somethingElse");
			assert_eq!(params["why"], "because");
		}
		other => panic!("Expected ProtocolMismatch, got: {:?}", other),
	}

	connection.close();
	run.await.unwrap().unwrap();
}

#[test]
fn test_classify_test_failed() {
	let envelope = ActionEnvelope::new(
		actions::TEST_FAILED,
		json!({"details": "expected true, got false"}),
	)
	.with_message_id(1);

	let err = classify(&[actions::INVOKE_RESULT.to_string()], envelope).unwrap_err();
	assert!(err.is_test_failure());
	assert!(err.to_string().contains("expected true, got false"));
}

#[test]
fn test_classify_error_is_remote_execution() {
	let envelope =
		ActionEnvelope::new(actions::ERROR, json!({"details": "this is an error"})).with_message_id(1);

	match classify(&[actions::INVOKE_RESULT.to_string()], envelope) {
		Err(Error::RemoteExecution { details }) => assert_eq!(details, "this is an error"),
		other => panic!("Expected RemoteExecution, got: {:?}", other),
	}
}

#[test]
fn test_classify_error_without_details_keeps_params() {
	let envelope = ActionEnvelope::new(actions::ERROR, json!({"reason": "x"})).with_message_id(1);

	match classify(&[actions::INVOKE_RESULT.to_string()], envelope) {
		Err(Error::RemoteExecution { details }) => assert!(details.contains("reason")),
		other => panic!("Expected RemoteExecution, got: {:?}", other),
	}
}

#[tokio::test]
async fn test_duplicate_response_is_ignored() {
	let (connection, _peer) = create_test_connection();

	let (tx, rx) = oneshot::channel();
	connection.pending.lock().insert(
		5,
		PendingRequest {
			action: actions::IS_READY.to_string(),
			expected: vec![actions::READY.to_string()],
			sender: tx,
		},
	);

	connection.dispatch(ActionEnvelope::new(actions::READY, json!({"n": 1})).with_message_id(5));
	connection.dispatch(ActionEnvelope::new(actions::ERROR, json!({"n": 2})).with_message_id(5));

	let result = rx.await.unwrap().unwrap();
	assert_eq!(result.params["n"], 1);
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_crash_event_is_recorded_not_rejected() {
	let (connection, _peer) = create_test_connection();

	let (tx, mut rx) = oneshot::channel();
	connection.pending.lock().insert(
		1,
		PendingRequest {
			action: actions::INVOKE.to_string(),
			expected: vec![actions::INVOKE_RESULT.to_string()],
			sender: tx,
		},
	);

	connection.dispatch_value(json!({
		"type": "AppWillTerminateWithError",
		"params": {"errorDetails": "someDetails"},
		"messageId": -10000
	}));

	assert!(rx.try_recv().is_err());
	assert_eq!(connection.pending_count(), 1);
	assert_eq!(connection.take_pending_crash().as_deref(), Some("someDetails"));
	assert_eq!(connection.take_pending_crash(), None);
}

#[tokio::test]
async fn test_close_rejects_all_pending() {
	let (connection, mut peer) = create_test_connection();
	let run = spawn_run(&connection);

	let mut requests = Vec::new();
	for _ in 0..3 {
		let c = Arc::clone(&connection);
		requests.push(tokio::spawn(async move {
			c.send(actions::INVOKE, json!({}), &[actions::INVOKE_RESULT])
				.await
		}));
		peer.recv().await.unwrap();
	}

	peer.hang_up();
	run.await.unwrap().unwrap();

	for request in requests {
		assert!(matches!(request.await.unwrap(), Err(Error::ChannelClosed)));
	}
	assert!(!connection.is_open());
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_send_after_close_fails_fast() {
	let (connection, _peer) = create_test_connection();
	connection.close();

	let result = connection
		.send(actions::IS_READY, json!({}), &[actions::READY])
		.await;
	assert!(matches!(result, Err(Error::ChannelClosed)));
	assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_dropped_request_future_clears_pending_entry() {
	let (connection, mut peer) = create_test_connection();
	let run = spawn_run(&connection);

	let result = tokio::time::timeout(
		Duration::from_millis(20),
		connection.send(actions::INVOKE, json!({}), &[actions::INVOKE_RESULT]),
	)
	.await;
	assert!(result.is_err());
	assert_eq!(connection.pending_count(), 0);

	let sent = peer.recv().await.unwrap();
	peer.reply(actions::INVOKE_RESULT, json!({}), sent.message_id.unwrap())
		.unwrap();

	connection.close();
	run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_twice_is_an_error() {
	let (connection, _peer) = create_test_connection();
	let run = spawn_run(&connection);
	tokio::task::yield_now().await;
	tokio::time::sleep(Duration::from_millis(10)).await;

	let second = connection.run().await;
	assert!(matches!(second, Err(Error::ProtocolError(_))));

	connection.close();
	run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_resolves_after_close() {
	let (connection, _peer) = create_test_connection();
	let waiter = {
		let c = Arc::clone(&connection);
		tokio::spawn(async move { c.closed().await })
	};

	connection.close();
	tokio::time::timeout(Duration::from_secs(1), waiter)
		.await
		.unwrap()
		.unwrap();
}
