//! Bidirectional relay sessions.

use crate::copy::{CopyError, copy};
use crate::endpoint::{Closer, Endpoint, PacketEndpoint, Sink};
use crate::packet_copy::copy_packet;
use crate::task::TaskGroup;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Relay a stream connection to a destination in both directions.
///
/// Upload copies `conn` into `dest`, download copies `dest` into `conn`.
/// A direction that ends cleanly half-closes its sink, or closes the whole
/// endpoint when the sink cannot half-close, and the other direction keeps
/// draining. An error in either direction cancels the other. Both endpoints
/// are closed exactly once when the relay returns.
///
/// # Errors
///
/// [`CopyError::NilEndpoint`] if a half is missing, otherwise the first
/// error from either direction.
pub async fn copy_conn(
    token: &CancellationToken,
    conn: Endpoint,
    dest: Endpoint,
) -> Result<u64, CopyError> {
    let (Some(mut conn_source), Some(mut conn_sink)) = (conn.source, conn.sink) else {
        conn.closer.close();
        dest.closer.close();
        return Err(CopyError::NilEndpoint("connection"));
    };
    let (Some(mut dest_source), Some(mut dest_sink)) = (dest.source, dest.sink) else {
        conn.closer.close();
        dest.closer.close();
        return Err(CopyError::NilEndpoint("destination"));
    };

    let mut group = TaskGroup::new();

    let closer = dest.closer.clone();
    group.append("upload", async move {
        let n = copy(dest_sink.as_mut(), conn_source.as_mut()).await?;
        finish_direction(dest_sink.as_mut(), &closer).await;
        Ok(n)
    });

    let closer = conn.closer.clone();
    group.append("download", async move {
        let n = copy(conn_sink.as_mut(), dest_source.as_mut()).await?;
        finish_direction(conn_sink.as_mut(), &closer).await;
        Ok(n)
    });

    let (conn_closer, dest_closer) = (conn.closer, dest.closer);
    group.cleanup(move || {
        conn_closer.close();
        dest_closer.close();
    });

    group.run(token).await
}

async fn finish_direction(sink: &mut dyn Sink, closer: &Closer) {
    if sink.can_half_close() {
        if let Err(e) = sink.close_write().await {
            debug!(error = %e, "half-close failed");
            closer.close();
        }
    } else {
        closer.close();
    }
}

/// Relay a packet connection to a destination in both directions.
///
/// Any direction finishing, successfully or not, cancels the other. Both
/// endpoints are closed exactly once when the relay returns.
///
/// # Errors
///
/// [`CopyError::NilEndpoint`] if a half is missing, otherwise the first
/// error from either direction.
pub async fn copy_packet_conn(
    token: &CancellationToken,
    conn: PacketEndpoint,
    dest: PacketEndpoint,
) -> Result<u64, CopyError> {
    let (Some(mut conn_source), Some(mut conn_sink)) = (conn.source, conn.sink) else {
        conn.closer.close();
        dest.closer.close();
        return Err(CopyError::NilEndpoint("packet connection"));
    };
    let (Some(mut dest_source), Some(mut dest_sink)) = (dest.source, dest.sink) else {
        conn.closer.close();
        dest.closer.close();
        return Err(CopyError::NilEndpoint("packet destination"));
    };

    let mut group = TaskGroup::new();
    group.fast_fail();
    group.append("upload", async move {
        copy_packet(dest_sink.as_mut(), conn_source.as_mut()).await
    });
    group.append("download", async move {
        copy_packet(conn_sink.as_mut(), dest_source.as_mut()).await
    });

    let (conn_closer, dest_closer) = (conn.closer, dest.closer);
    group.cleanup(move || {
        conn_closer.close();
        dest_closer.close();
    });

    group.run(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StreamParts;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn counted(count: &Arc<AtomicUsize>) -> Closer {
        let count = count.clone();
        Closer::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_copy_conn_both_directions() {
        let (client, conn_side) = duplex(1024);
        let (dest_side, server) = duplex(1024);
        let closes = Arc::new(AtomicUsize::new(0));

        let conn = StreamParts::from_io(conn_side)
            .with_closer(counted(&closes))
            .into_endpoint();
        let dest = StreamParts::from_io(dest_side)
            .with_closer(counted(&closes))
            .into_endpoint();
        let relay = tokio::spawn(async move { copy_conn(&CancellationToken::new(), conn, dest).await });

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut server_rd, mut server_wr) = tokio::io::split(server);

        client_wr.write_all(b"request").await.unwrap();
        client_wr.shutdown().await.unwrap();
        let mut request = Vec::new();
        server_rd.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"request");

        server_wr.write_all(b"response!").await.unwrap();
        server_wr.shutdown().await.unwrap();
        let mut response = Vec::new();
        client_rd.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"response!");

        assert_eq!(relay.await.unwrap().unwrap(), 16);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_and_closes_once() {
        let (_client, conn_side) = duplex(64);
        let (dest_side, _server) = duplex(64);
        let closes = Arc::new(AtomicUsize::new(0));

        let conn = StreamParts::from_io(conn_side)
            .with_closer(counted(&closes))
            .into_endpoint();
        let dest = StreamParts::from_io(dest_side)
            .with_closer(counted(&closes))
            .into_endpoint();

        let token = CancellationToken::new();
        let relay_token = token.clone();
        let relay = tokio::spawn(async move { copy_conn(&relay_token, conn, dest).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .expect("relay must stop after cancellation")
            .unwrap();
        assert!(matches!(result, Err(CopyError::Cancelled)));
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_half_is_nil_endpoint() {
        let (_a, conn_side) = duplex(64);
        let (dest_side, _b) = duplex(64);
        let closes = Arc::new(AtomicUsize::new(0));

        let mut conn = StreamParts::from_io(conn_side)
            .with_closer(counted(&closes))
            .into_endpoint();
        conn.sink = None;
        let dest = StreamParts::from_io(dest_side)
            .with_closer(counted(&closes))
            .into_endpoint();

        let result = copy_conn(&CancellationToken::new(), conn, dest).await;
        assert!(matches!(result, Err(CopyError::NilEndpoint(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }
}
