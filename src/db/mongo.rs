//! MongoDB client and collection wrapper

use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions, UpdateModifications, UpdateOptions},
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::types::{now_iso, CareError};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas carrying string timestamps
pub trait Timestamped {
    fn stamp(&mut self, now: &str);
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, CareError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| CareError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    /// Round-trip to the server
    pub async fn ping(&self) -> Result<(), CareError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| CareError::Database(format!("MongoDB ping failed: {}", e)))
    }

    /// Get a typed collection
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, CareError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + Timestamped,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + Timestamped,
{
    /// Create a new collection and apply indexes
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, CareError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };
        mongo_collection.apply_indexes().await?;
        Ok(mongo_collection)
    }

    /// Apply schema-defined indexes
    async fn apply_indexes(&self) -> Result<(), CareError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| CareError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document, stamping its timestamps.
    ///
    /// A unique-index violation maps to `Conflict`.
    pub async fn insert_one(&self, mut item: T) -> Result<T, CareError> {
        item.stamp(&now_iso());

        match self.inner.insert_one(&item).await {
            Ok(_) => Ok(item),
            Err(e) if is_duplicate_key(&e) => Err(CareError::Conflict("Record already exists.".into())),
            Err(e) => Err(CareError::Database(format!("Insert failed: {}", e))),
        }
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, CareError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| CareError::Database(format!("Find failed: {}", e)))
    }

    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, CareError> {
        self.find_sorted(filter, None, None).await
    }

    /// Find with an optional sort and limit
    pub async fn find_sorted(
        &self,
        filter: Document,
        sort: Option<Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>, CareError> {
        let options = FindOptions::builder().sort(sort).limit(limit).build();

        let cursor = self
            .inner
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| CareError::Database(format!("Find failed: {}", e)))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| CareError::Database(format!("Error reading documents: {}", e)))
    }

    pub async fn count(&self, filter: Document) -> Result<u64, CareError> {
        self.inner
            .count_documents(filter)
            .await
            .map_err(|e| CareError::Database(format!("Count failed: {}", e)))
    }

    /// Update every matching document, returning the modified count
    pub async fn update_many(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<u64, CareError> {
        self.inner
            .update_many(filter, update)
            .await
            .map(|r| r.modified_count)
            .map_err(|e| CareError::Database(format!("Update failed: {}", e)))
    }

    /// Update one document, inserting it when nothing matches
    pub async fn upsert_one(&self, filter: Document, update: Document) -> Result<(), CareError> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.inner
            .update_one(filter, update)
            .with_options(options)
            .await
            .map(|_| ())
            .map_err(|e| CareError::Database(format!("Upsert failed: {}", e)))
    }

    /// Replace the document with the same `_id`
    pub async fn replace_one(&self, filter: Document, item: &T) -> Result<u64, CareError> {
        self.inner
            .replace_one(filter, item)
            .await
            .map(|r| r.matched_count)
            .map_err(|e| CareError::Database(format!("Replace failed: {}", e)))
    }

    pub async fn delete_many(&self, filter: Document) -> Result<u64, CareError> {
        self.inner
            .delete_many(filter)
            .await
            .map(|r| r.deleted_count)
            .map_err(|e| CareError::Database(format!("Delete failed: {}", e)))
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}
