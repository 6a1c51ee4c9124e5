mod common;

use common::*;
use davrelay_tpc::{CopyRequest, OpenMode, ResponseEvent, TpcHandler};

fn push_request() -> CopyRequest {
    CopyRequest::copy("/store/file").header("Destination", "davs://remote.example:8443/upload/file")
}

#[tokio::test]
async fn test_push_uploads_local_file() {
    let data = payload(50);
    let storage = MemStorage::with_file("/store/file", &data);
    let handler = TpcHandler::new(test_config(), storage, FakeRemote::serving(b"")).unwrap();

    let (result, events) = run(&handler, push_request()).await;
    result.unwrap();

    assert!(matches!(&events[0], ResponseEvent::Start { status: 201, .. }));
    assert_eq!(final_message(&events), "success: Created");

    let remote = handler.client();
    assert_eq!(*remote.uploaded.lock().unwrap(), data);
    let puts = remote.puts.lock().unwrap();
    assert_eq!(puts[0].0, "https://remote.example:8443/upload/file");
    assert_eq!(puts[0].2, 50);

    let storage = handler.storage();
    assert_eq!(storage.last_open().unwrap().mode, OpenMode::Read);
    assert_eq!(storage.close_count(), 1);
}

#[tokio::test]
async fn test_push_forwards_transfer_headers() {
    let storage = MemStorage::with_file("/store/file", b"abc");
    let handler = TpcHandler::new(test_config(), storage, FakeRemote::serving(b"")).unwrap();
    let req = push_request().header("TransferHeaderAuthorization", "Bearer upload");

    let (result, _) = run(&handler, req).await;
    result.unwrap();
    let puts = handler.client().puts.lock().unwrap();
    assert_eq!(puts[0].1, [("authorization".to_string(), "Bearer upload".to_string())]);
}

#[tokio::test]
async fn test_push_remote_rejects() {
    let storage = MemStorage::with_file("/store/file", b"abc");
    let mut remote = FakeRemote::serving(b"");
    remote.put_status = 403;
    remote.error_body = "forbidden";
    let handler = TpcHandler::new(test_config(), storage, remote).unwrap();

    let (result, events) = run(&handler, push_request()).await;
    result.unwrap();
    assert_eq!(
        final_message(&events),
        "failure: Remote side failed with status code 403; error message: \"forbidden\", \
         local=/store/file, remote=https://remote.example:8443/upload/file"
    );
}

#[tokio::test]
async fn test_push_missing_local_file() {
    let handler = TpcHandler::new(test_config(), MemStorage::default(), FakeRemote::serving(b"")).unwrap();

    let (result, events) = run(&handler, push_request()).await;
    result.unwrap();
    let (status, _, body) = simple(&events);
    assert_eq!(status, 400);
    assert!(body.starts_with("failure: no such file"), "{body}");
    assert!(handler.client().puts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_empty_file() {
    let storage = MemStorage::with_file("/store/empty", b"");
    let handler = TpcHandler::new(test_config(), storage, FakeRemote::serving(b"")).unwrap();
    let req = CopyRequest::copy("/store/empty").header("Destination", "https://remote.example/empty");

    let (result, events) = run(&handler, req).await;
    result.unwrap();
    assert_eq!(final_message(&events), "success: Created");
    assert!(handler.client().uploaded.lock().unwrap().is_empty());
}
