use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

pub const FTS_ANALYZER_NAME: &str = "app_en_fts_analyzer";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects, signs in as root and selects the namespace and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the analyzer and indexes the answering pipeline reads through. Idempotent.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.define_analyzer().await?;
        self.build_indexes().await?;
        Ok(())
    }

    async fn define_analyzer(&self) -> Result<(), Error> {
        let analyzer_query = format!(
            "DEFINE ANALYZER IF NOT EXISTS {FTS_ANALYZER_NAME}
                TOKENIZERS class
                FILTERS lowercase, ascii, snowball(english);"
        );

        self.client.query(analyzer_query).await?.check()?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        let definitions = [
            format!(
                "DEFINE INDEX IF NOT EXISTS idx_fts_document_chunk_content ON TABLE document_chunk \
                 FIELDS content SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25;"
            ),
            "DEFINE INDEX IF NOT EXISTS idx_document_chunk_category ON TABLE document_chunk FIELDS category;"
                .to_string(),
            "DEFINE INDEX IF NOT EXISTS idx_message_conversation ON TABLE message FIELDS conversation_id, message_index;"
                .to_string(),
            "DEFINE INDEX IF NOT EXISTS idx_conversation_user ON TABLE conversation FIELDS user_id, updated_at;"
                .to_string(),
        ];

        for definition in definitions {
            debug!(%definition, "Defining index");
            self.client.query(definition).await?.check()?;
        }

        Ok(())
    }

    /// Creates the record under its own id. Fails if the id already exists.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
