use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use super::context::CallContext;
use super::state::RecordStore;
use crate::proto::query_service_server::QueryService;
use crate::proto::{self, LookupRequest, RecordList};
use crate::record::{validate_lookup, Record};

/// Outbound buffer of each streaming call.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

type RecordSender = mpsc::Sender<Result<proto::Record, Status>>;

/// gRPC service answering currency lookups against a [`RecordStore`].
pub struct QueryServiceImpl {
    store: RecordStore,
    stream_buffer: usize,
}

impl QueryServiceImpl {
    /// Creates the query service over `store`.
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Sets the per-stream outbound buffer size (at least one).
    pub fn with_stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size.max(1);
        self
    }
}

/// Sends one record; fails once the caller has gone away.
async fn send_record(tx: &RecordSender, record: Record, subject: &str) -> Result<(), Status> {
    tx.send(Ok(record.into())).await.map_err(|_| {
        warn!(subject, "stream receiver dropped, stopping producer");
        counter!("stream.receiver_dropped").increment(1);
        Status::cancelled("client went away")
    })
}

/// Ends a stream, forwarding `outcome` to the caller if it is an error.
async fn finish_stream(tx: &RecordSender, outcome: Result<(), Status>, subject: &str) {
    if let Err(status) = outcome {
        debug!(subject, code = ?status.code(), "stream aborted");
        let _ = tx.send(Err(status)).await;
    }
}

fn to_list(records: Vec<Record>) -> RecordList {
    RecordList {
        items: records.into_iter().map(Into::into).collect(),
    }
}

#[tonic::async_trait]
impl QueryService for QueryServiceImpl {
    type LookupStreamStream = ReceiverStream<Result<proto::Record, Status>>;
    type FindStream = ReceiverStream<Result<proto::Record, Status>>;

    async fn lookup(
        &self,
        request: Request<LookupRequest>,
    ) -> Result<Response<RecordList>, Status> {
        let start = Instant::now();
        counter!("lookup.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let req = request.into_inner();
        validate_lookup(&req)?;

        let found = ctx
            .guard(async { Ok::<_, Status>(self.store.search(&req.code, req.number).await) })
            .await?;

        debug!(
            subject = ctx.subject(),
            code = %req.code,
            number = req.number,
            found = found.len(),
            "lookup"
        );
        histogram!("lookup.duration").record(start.elapsed().as_secs_f64());

        Ok(Response::new(to_list(found)))
    }

    async fn lookup_stream(
        &self,
        request: Request<LookupRequest>,
    ) -> Result<Response<Self::LookupStreamStream>, Status> {
        counter!("lookup_stream.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let req = request.into_inner();
        validate_lookup(&req)?;

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let store = self.store.clone();

        tokio::spawn(async move {
            let subject = ctx.subject();
            let outcome = ctx
                .guard(async {
                    let found = store.search(&req.code, req.number).await;
                    debug!(
                        subject,
                        code = %req.code,
                        number = req.number,
                        found = found.len(),
                        "lookup stream"
                    );
                    for record in found {
                        send_record(&tx, record, subject).await?;
                    }
                    Ok::<_, Status>(())
                })
                .await;
            finish_stream(&tx, outcome, subject).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn ingest(
        &self,
        request: Request<Streaming<proto::Record>>,
    ) -> Result<Response<RecordList>, Status> {
        let start = Instant::now();
        counter!("ingest.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let mut inbound = request.into_inner();

        let batch = ctx
            .guard(async {
                let mut batch = Vec::new();
                while let Some(message) = inbound.message().await? {
                    let record = Record::try_from(message).map_err(|e| {
                        counter!("ingest.rejected").increment(1);
                        warn!(subject = ctx.subject(), error = %e, "invalid record, batch dropped");
                        Status::from(e)
                    })?;
                    batch.push(record);
                }
                Ok::<_, Status>(batch)
            })
            .await?;

        self.store.add(batch.clone()).await;

        counter!("ingest.records").increment(batch.len() as u64);
        histogram!("ingest.duration").record(start.elapsed().as_secs_f64());
        info!(subject = ctx.subject(), count = batch.len(), "batch committed");

        Ok(Response::new(to_list(batch)))
    }

    async fn find(
        &self,
        request: Request<Streaming<LookupRequest>>,
    ) -> Result<Response<Self::FindStream>, Status> {
        counter!("find.requests").increment(1);

        let ctx = CallContext::from_request(&request);
        let mut inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let store = self.store.clone();

        tokio::spawn(async move {
            let subject = ctx.subject();
            let outcome = ctx
                .guard(async {
                    while let Some(req) = inbound.message().await? {
                        validate_lookup(&req)?;
                        let found = store.search(&req.code, req.number).await;
                        debug!(
                            subject,
                            code = %req.code,
                            number = req.number,
                            found = found.len(),
                            "find"
                        );
                        for record in found {
                            send_record(&tx, record, subject).await?;
                        }
                    }
                    Ok::<_, Status>(())
                })
                .await;
            finish_stream(&tx, outcome, subject).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
