use crate::{env_or_default, env_required, ConfigError, FromEnv};

/// MongoDB configuration for the document store
#[derive(Clone, Debug)]
pub struct MongoConfig {
    pub uri: String,
    pub db_name: String,
    pub collection: String,
}

impl MongoConfig {
    pub fn new(uri: String, db_name: String, collection: String) -> Self {
        Self {
            uri,
            db_name,
            collection,
        }
    }
}

impl FromEnv for MongoConfig {
    /// Requires MONGO_URI; MONGO_DB and MONGO_COLLECTION have defaults
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            uri: env_required("MONGO_URI")?,
            db_name: env_or_default("MONGO_DB", "harvest"),
            collection: env_or_default("MONGO_COLLECTION", "collections"),
        })
    }
}
