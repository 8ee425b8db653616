mod backoff;
mod connection;
mod consumer;
mod publisher;
mod routes;

pub use backoff::Backoff;
pub use connection::{BrokerLink, ConnectionError, OwnerHandle, OwnerRequest, RabbitConnection};
pub use consumer::{
    ConsumerError, ConsumerHandle, ConsumerState, Dispatcher, Disposition, JobConsumer, JobHandler,
    PREFETCH_COUNT,
};
pub use publisher::{publish_result, PublishError, ResultPublisher, ResultSink};
pub use routes::QueueRoutes;

#[cfg(test)]
pub use publisher::MockResultSink;
