//! Collector Service - Entry Point
//!
//! Background worker that pulls collection requests from the bus, runs
//! them against remote hosts and ships the results to the dataservice.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    harvest_collector::run().await
}
