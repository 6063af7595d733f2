//! Session exclusivity, disconnects and outbound pacing.

use std::time::Duration;

use bytes::Bytes;
use fileframe::{
    CloseReason,
    FileTransferError,
    LinkError,
    ProtocolError,
    SessionConfig,
    protocol::{ReadData, Request, Response, Status, StatusReply, Tag},
};
use fileframe_testing::{fast_config, scripted_session};
use futures::FutureExt;
use rstest::rstest;
use tokio::time::Instant;

fn read_chunk(offset: u32, total: u32, data: &'static [u8]) -> Bytes {
    Response::ReadData(ReadData {
        status: Status::Ok,
        chunk_offset: offset,
        total_length: total,
        data: Bytes::from_static(data),
    })
    .to_bytes()
}

fn delete_ok() -> Bytes {
    Response::Status(StatusReply {
        tag: Tag::DeleteStatus,
        status: Status::Ok,
        mod_time_ns: 0,
    })
    .to_bytes()
}

#[rstest]
#[tokio::test]
async fn concurrent_call_is_rejected_without_sending(fast_config: SessionConfig) {
    let (session, mut remote) = scripted_session(fast_config);
    let reader = session.clone();
    let read = tokio::spawn(async move { reader.read_file("/code.py").await });
    remote.next_piece().await.expect("read command");
    assert_eq!(remote.piece_count(), 1);

    for attempt in [
        session.delete("/code.py").now_or_never(),
        session.make_dir("/lib", None).now_or_never(),
        session.move_path("/a", "/b").now_or_never(),
    ] {
        assert!(matches!(attempt, Some(Err(FileTransferError::Busy))));
    }
    assert!(matches!(
        session.list_dir("/").now_or_never(),
        Some(Err(FileTransferError::Busy))
    ));
    assert_eq!(remote.piece_count(), 1, "busy calls must not touch the link");

    remote.deliver(read_chunk(0, 8, b"print(1)")).await;
    let content = read.await.expect("join read").expect("read succeeds");
    assert_eq!(content, "print(1)");

    // The guard is released once the read resolves.
    let delete = tokio::spawn(async move { session.delete("/code.py").await });
    remote.next_piece().await.expect("delete command");
    remote.deliver(delete_ok()).await;
    delete.await.expect("join delete").expect("delete succeeds");
}

#[tokio::test]
async fn disconnect_mid_read_rejects_and_closes() {
    let config = fast_config().receive_capacity(32);
    let (session, mut remote) = scripted_session(config);
    let reader = session.clone();
    let read = tokio::spawn(async move { reader.read_file("/big.bin").await });

    let command = remote.next_piece().await.expect("read command");
    assert!(matches!(
        Request::parse(&command),
        Ok(Some((Request::Read { max_len: 16, .. }, _)))
    ));
    remote.deliver(read_chunk(0, 40, b"0123456789abcdef")).await;
    let pacing = remote.next_piece().await.expect("read pacing");
    assert!(matches!(
        Request::parse(&pacing),
        Ok(Some((
            Request::ReadPacing {
                offset: 16,
                max_len: 16
            },
            _
        )))
    ));

    // Half of the next frame, then the link drops.
    let next = read_chunk(16, 40, b"ghijklmnopqrstuv");
    remote.deliver(next.slice(..9)).await;
    remote.disconnect().await;

    let err = read.await.expect("join read").expect_err("link lost");
    assert!(matches!(err, FileTransferError::Link(LinkError::Disconnected)));
    assert_eq!(err.close_reason(), Some(CloseReason::Disconnected));

    let err = session.delete("/x").await.expect_err("session closed");
    assert!(matches!(
        err,
        FileTransferError::Closed(CloseReason::Disconnected)
    ));
    assert_eq!(remote.piece_count(), 2);

    // A fresh session over the re-established link starts clean.
    let (session, mut remote) = scripted_session(fast_config());
    let delete = tokio::spawn(async move { session.delete("/x").await });
    remote.next_piece().await.expect("delete command");
    remote.deliver(delete_ok()).await;
    delete.await.expect("join delete").expect("delete succeeds");
}

#[tokio::test]
async fn repeated_read_chunk_fails_instead_of_returning_gaps() {
    let config = fast_config().receive_capacity(32);
    let (session, mut remote) = scripted_session(config);
    let read = tokio::spawn(async move { session.read_file("/code.py").await });

    remote.next_piece().await.expect("read command");
    remote.deliver(read_chunk(0, 8, b"0123")).await;
    remote.next_piece().await.expect("read pacing");
    remote.deliver(read_chunk(0, 8, b"0123")).await;

    let err = read.await.expect("join read").expect_err("out of sequence");
    assert!(matches!(
        err,
        FileTransferError::Protocol(ProtocolError::UnexpectedChunkOffset {
            expected: 4,
            found: 0
        })
    ));
    assert_eq!(err.close_reason(), None);
}

#[tokio::test(start_paused = true)]
async fn outbound_pieces_are_bounded_and_spaced() {
    let config = SessionConfig::default()
        .max_fragment_len(4)
        .pacing_delay(Duration::from_millis(100))
        .operation_timeout(None);
    let (session, mut remote) = scripted_session(config);
    let delete = tokio::spawn(async move { session.delete("/abcdefgh").await });

    let mut command = Vec::new();
    let mut arrivals = Vec::new();
    while command.len() < 13 {
        let piece = remote.next_piece().await.expect("command piece");
        assert!(piece.len() <= 4);
        arrivals.push(Instant::now());
        command.extend_from_slice(&piece);
    }
    assert_eq!(arrivals.len(), 4);
    for pair in arrivals.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }
    assert_eq!(
        Request::parse(&command).expect("valid").map(|(r, _)| r),
        Some(Request::Delete {
            path: "/abcdefgh".into()
        })
    );

    remote.deliver(delete_ok()).await;
    delete.await.expect("join delete").expect("delete succeeds");
}

#[tokio::test(start_paused = true)]
async fn unanswered_operation_times_out() {
    let config = fast_config().operation_timeout(Some(Duration::from_secs(2)));
    let (session, mut remote) = scripted_session(config);
    let started = Instant::now();
    let pending = session.clone();
    let delete = tokio::spawn(async move { pending.delete("/slow").await });
    remote.next_piece().await.expect("delete command");

    let err = delete.await.expect("join delete").expect_err("no reply");
    assert!(matches!(err, FileTransferError::Timeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(2));

    let err = session.delete("/slow").await.expect_err("closed");
    assert!(matches!(err, FileTransferError::Closed(CloseReason::TimedOut)));
}

#[tokio::test]
async fn cancel_rejects_the_pending_call() {
    let (session, mut remote) = scripted_session(fast_config());
    let pending = session.clone();
    let listing = tokio::spawn(async move { pending.list_dir("/").await });
    remote.next_piece().await.expect("listdir command");

    session.cancel();
    let err = listing.await.expect("join listing").expect_err("cancelled");
    assert!(matches!(err, FileTransferError::Cancelled));
    assert!(matches!(
        session.list_dir("/").await,
        Err(FileTransferError::Closed(CloseReason::Cancelled))
    ));
}
