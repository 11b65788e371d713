use std::sync::Arc;

use serde_json::Value;
use tandem_contracts::ProcedureKind;
use tokio::sync::{mpsc, oneshot};

use crate::ClientError;
use crate::transport::{OutboundCall, Transport};

pub(crate) type Reply = oneshot::Sender<Result<Value, ClientError>>;

pub(crate) struct PendingCall {
    pub kind: ProcedureKind,
    pub call: OutboundCall,
    pub reply: Reply,
}

/// Starts the task that coalesces queued calls into batched requests.
///
/// Everything queued by the time the task is next scheduled goes out
/// together, up to `max_batch_size` calls per request. Queries and mutations
/// never share a request. The task exits once every sender is dropped.
pub(crate) fn spawn_dispatcher(
    handle: &tokio::runtime::Handle,
    transport: Arc<Transport>,
    max_batch_size: usize,
) -> mpsc::UnboundedSender<PendingCall> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PendingCall>();
    let max_batch_size = max_batch_size.max(1);
    let spawner = handle.clone();

    handle.spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut queued = vec![first];
            tokio::task::yield_now().await;
            while queued.len() < max_batch_size {
                match rx.try_recv() {
                    Ok(next) => queued.push(next),
                    Err(_) => break,
                }
            }

            let (queries, mutations): (Vec<_>, Vec<_>) = queued
                .into_iter()
                .partition(|pending| pending.kind == ProcedureKind::Query);

            for (kind, group) in [
                (ProcedureKind::Query, queries),
                (ProcedureKind::Mutation, mutations),
            ] {
                if group.is_empty() {
                    continue;
                }
                spawner.spawn(flush(Arc::clone(&transport), kind, group));
            }
        }
        tracing::debug!("rpc batch dispatcher stopped");
    });

    tx
}

async fn flush(transport: Arc<Transport>, kind: ProcedureKind, group: Vec<PendingCall>) {
    let (calls, replies): (Vec<_>, Vec<_>) = group
        .into_iter()
        .map(|pending| (pending.call, pending.reply))
        .unzip();

    let results = transport.send(kind, &calls).await;
    for (reply, result) in replies.into_iter().zip(results) {
        // Receiver gone means the caller stopped waiting.
        let _ = reply.send(result);
    }
}
