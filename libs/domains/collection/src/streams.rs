//! Bus stream definitions for the collection pipeline.

use stream_bus::StreamDef;

/// Collection requests flowing from intake to the collector fleet.
pub struct CollectRequestStream;

impl StreamDef for CollectRequestStream {
    const STREAM_NAME: &'static str = "harvest:requests";
    const CONSUMER_GROUP: &'static str = "collectors";
}
