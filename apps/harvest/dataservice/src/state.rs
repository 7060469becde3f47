use crate::config::Config;
use mongodb::bson::Document;
use mongodb::{Client, Collection};

/// Shared state for dataservice handlers.
#[derive(Clone)]
pub struct AppState {
    /// Target collection for graph documents.
    pub collection: Collection<Document>,
}

impl AppState {
    pub fn new(client: &Client, config: &Config) -> Self {
        let collection = client
            .database(&config.mongo.db_name)
            .collection::<Document>(&config.mongo.collection);
        Self { collection }
    }
}
