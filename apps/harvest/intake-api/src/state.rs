use domain_collection::CollectRequestStream;
use redis::aio::ConnectionManager;
use stream_bus::BusProducer;

/// Shared state for intake handlers.
#[derive(Clone)]
pub struct AppState {
    /// Producer feeding the collection request stream.
    pub producer: BusProducer,
}

impl AppState {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            producer: BusProducer::from_stream_def::<CollectRequestStream>(redis),
        }
    }
}
