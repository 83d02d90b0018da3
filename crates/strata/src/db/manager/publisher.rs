use crate::{db::query::QueryResult, error::Error, traits::Entity, types::Identifier};
use tokio::sync::{mpsc, oneshot};

///
/// MutationEvent
///
/// One committed mutation, published on the manager's per-entity-type topic
/// in commit order. External writes, removals, and persisted remote reads
/// all publish here.
///

#[derive(Clone, Debug)]
pub enum MutationEvent<E: Entity> {
    Upserted(Vec<E>),
    Removed(Vec<Identifier>),
}

///
/// OnceResult
///
/// One-shot half of a read subscription: completes with the first
/// authoritative result, or with the read's terminal error.
///

#[derive(Debug)]
pub struct OnceResult<E: Entity> {
    rx: oneshot::Receiver<Result<QueryResult<E>, Error>>,
}

impl<E: Entity> OnceResult<E> {
    pub async fn result(self) -> Result<QueryResult<E>, Error> {
        self.rx.await.map_err(|_| Error::Cancelled)?
    }
}

///
/// Continuous
///
/// Continuous half of a read subscription: yields every distinct result the
/// query evaluates to as mutations commit. Never completes on its own; a
/// yielded `Err` is terminal. Dropping the handle cancels the subscription.
///

#[derive(Debug)]
pub struct Continuous<E: Entity> {
    rx: mpsc::Receiver<Result<QueryResult<E>, Error>>,
}

impl<E: Entity> Continuous<E> {
    pub async fn next(&mut self) -> Option<Result<QueryResult<E>, Error>> {
        self.rx.recv().await
    }
}

///
/// SearchResponse
///
/// The `(once, continuous)` pair produced by every read operation. The two
/// halves share one subscription: they agree on the first authoritative
/// value, and dropping both cancels any in-flight fetch that has no other
/// consumer.
///

#[derive(Debug)]
pub struct SearchResponse<E: Entity> {
    pub once: OnceResult<E>,
    pub continuous: Continuous<E>,
}

impl<E: Entity> SearchResponse<E> {
    /// Await the first authoritative result, dropping the continuous half.
    pub async fn result(self) -> Result<QueryResult<E>, Error> {
        self.once.result().await
    }
}

///
/// Emitter
///
/// Sending side of one subscription. Owns the change-only emission rule:
/// the continuous stream repeats no payload, and `once` resolves exactly
/// once with the first authoritative value.
///

pub(crate) struct Emitter<E: Entity> {
    once: Option<oneshot::Sender<Result<QueryResult<E>, Error>>>,
    cont: mpsc::Sender<Result<QueryResult<E>, Error>>,
    last: Option<QueryResult<E>>,
}

impl<E: Entity> Emitter<E> {
    pub(crate) fn channel(buffer: usize) -> (Self, SearchResponse<E>) {
        let (once_tx, once_rx) = oneshot::channel();
        let (cont_tx, cont_rx) = mpsc::channel(buffer);

        let emitter = Self {
            once: Some(once_tx),
            cont: cont_tx,
            last: None,
        };
        let response = SearchResponse {
            once: OnceResult { rx: once_rx },
            continuous: Continuous { rx: cont_rx },
        };

        (emitter, response)
    }

    /// Emit on the continuous stream only (e.g. the local half of
    /// local-then-remote). Skipped when the payload equals the last emitted.
    pub(crate) async fn emit_intermediate(&mut self, result: QueryResult<E>) {
        let changed = self
            .last
            .as_ref()
            .is_none_or(|last| !last.same_payload(&result));
        if changed {
            let _ = self.cont.send(Ok(result.clone())).await;
            self.last = Some(result);
        }
    }

    /// Emit the authoritative value: resolves `once` and feeds the
    /// continuous stream under the same change-only rule.
    pub(crate) async fn emit_authoritative(&mut self, result: QueryResult<E>) {
        if let Some(tx) = self.once.take() {
            let _ = tx.send(Ok(result.clone()));
        }
        self.emit_intermediate(result).await;
    }

    /// Terminal failure: both halves observe the error.
    pub(crate) async fn fail(&mut self, err: Error) {
        if let Some(tx) = self.once.take() {
            let _ = tx.send(Err(err.clone()));
        }
        let _ = self.cont.send(Err(err)).await;
    }

    /// The last emitted value, if any.
    pub(crate) const fn last(&self) -> Option<&QueryResult<E>> {
        self.last.as_ref()
    }

    /// Resolves when every consumer is gone: the continuous receiver is
    /// dropped and `once` is either resolved or dropped.
    pub(crate) async fn abandoned(&mut self) {
        self.cont.closed().await;
        if let Some(tx) = self.once.as_mut() {
            tx.closed().await;
        }
    }

    /// Whether any consumer remains.
    pub(crate) fn has_consumers(&self) -> bool {
        !self.cont.is_closed() || self.once.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
