//! MongoDB-backed store implementations.

use super::{HistoryStore, MemoryStore, StoreError};
use crate::models::{Conversation, ConversationMeta, ConversationSummary, UserProfile};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, from_document},
    options::{FindOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

const CONVERSATIONS: &str = "conversations";
const USER_MEMORIES: &str = "user-memories";

async fn connect(uri: &str, database: &str) -> Result<(MongoClient, Database), StoreError> {
    tracing::info!(database = %database, "Connecting to MongoDB");
    let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to MongoDB");
        StoreError::from(e)
    })?;
    let db = client.database(database);
    tracing::info!(database = %database, "Successfully connected to MongoDB");
    Ok((client, db))
}

async fn ping(client: &MongoClient) -> Result<(), StoreError> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 }, None)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "MongoDB health check failed");
            StoreError::from(e)
        })?;
    Ok(())
}

#[derive(Clone)]
pub struct MongoHistoryStore {
    client: MongoClient,
    db: Database,
}

impl MongoHistoryStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let (client, db) = connect(uri, database).await?;
        Ok(Self { client, db })
    }

    fn conversations(&self) -> Collection<Conversation> {
        self.db.collection(CONVERSATIONS)
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for conversation history");

        let partition_key_index = IndexModel::builder()
            .keys(doc! { "userId": 1, "sessionId": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_session_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.conversations()
            .create_index(partition_key_index, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, index = "user_session_idx", "Failed to create index");
                StoreError::from(e)
            })?;

        let listing_index = IndexModel::builder()
            .keys(doc! { "userId": 1, "lastActivity": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_activity_idx".to_string())
                    .build(),
            )
            .build();
        self.conversations()
            .create_index(listing_index, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, index = "user_activity_idx", "Failed to create index");
                StoreError::from(e)
            })?;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MongoHistoryStore {
    #[tracing::instrument(skip_all, fields(session_id = %conversation.session_id))]
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let filter = doc! {
            "userId": &conversation.user_id,
            "sessionId": &conversation.session_id,
        };
        self.conversations()
            .replace_one(
                filter,
                conversation,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to upsert conversation");
                StoreError::from(e)
            })?;

        tracing::debug!("Conversation upserted");
        Ok(())
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        let filter = doc! { "userId": user_id, "sessionId": session_id };
        let found = self.conversations().find_one(filter, None).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to find conversation");
            StoreError::from(e)
        })?;
        Ok(found)
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationMeta>, StoreError> {
        let pipeline = vec![
            doc! { "$match": { "userId": user_id } },
            doc! { "$sort": { "lastActivity": -1 } },
            doc! { "$limit": limit },
            doc! { "$project": {
                "_id": 0,
                "sessionId": 1,
                "title": 1,
                "lastActivity": 1,
                "messageCount": { "$size": { "$ifNull": ["$messages", []] } },
            }},
        ];

        let cursor = self
            .conversations()
            .aggregate(pipeline, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to list conversations");
                StoreError::from(e)
            })?;

        let documents: Vec<mongodb::bson::Document> = cursor.try_collect().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to collect conversation listing");
            StoreError::from(e)
        })?;

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(from_document::<ConversationMeta>(document)?);
        }
        Ok(results)
    }

    async fn update_title(
        &self,
        user_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<bool, StoreError> {
        let filter = doc! { "userId": user_id, "sessionId": session_id };
        let update = doc! { "$set": { "title": title } };
        let result = self
            .conversations()
            .update_one(filter, update, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to update conversation title");
                StoreError::from(e)
            })?;
        Ok(result.matched_count > 0)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        ping(&self.client).await
    }
}

#[derive(Clone)]
pub struct MongoMemoryStore {
    client: MongoClient,
    db: Database,
}

impl MongoMemoryStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let (client, db) = connect(uri, database).await?;
        Ok(Self { client, db })
    }

    fn summaries(&self) -> Collection<ConversationSummary> {
        self.db.collection(CONVERSATIONS)
    }

    fn profiles(&self) -> Collection<UserProfile> {
        self.db.collection(USER_MEMORIES)
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        tracing::info!("Creating MongoDB indexes for memory collections");

        let summary_index = IndexModel::builder()
            .keys(doc! { "userId": 1, "sessionId": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_session_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.summaries()
            .create_index(summary_index, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, index = "user_session_idx", "Failed to create index");
                StoreError::from(e)
            })?;

        let profile_index = IndexModel::builder()
            .keys(doc! { "userId": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.profiles()
            .create_index(profile_index, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, index = "user_idx", "Failed to create index");
                StoreError::from(e)
            })?;

        Ok(())
    }
}

#[async_trait]
impl MemoryStore for MongoMemoryStore {
    #[tracing::instrument(skip_all, fields(session_id = %summary.session_id))]
    async fn upsert_summary(&self, summary: &ConversationSummary) -> Result<(), StoreError> {
        let filter = doc! { "userId": &summary.user_id, "sessionId": &summary.session_id };
        self.summaries()
            .replace_one(filter, summary, ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to upsert conversation summary");
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn summaries_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let filter = doc! { "userId": user_id };
        let options = FindOptions::builder().sort(doc! { "timestamp": -1 }).build();
        let cursor = self.summaries().find(filter, options).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to query conversation summaries");
            StoreError::from(e)
        })?;

        let summaries = cursor.try_collect().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to collect conversation summaries");
            StoreError::from(e)
        })?;
        Ok(summaries)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let found = self
            .profiles()
            .find_one(doc! { "userId": user_id }, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to find user profile");
                StoreError::from(e)
            })?;
        Ok(found)
    }

    #[tracing::instrument(skip_all, fields(user_id = %profile.user_id))]
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let filter = doc! { "userId": &profile.user_id };
        self.profiles()
            .replace_one(filter, profile, ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to upsert user profile");
                StoreError::from(e)
            })?;
        Ok(())
    }

    async fn delete_profile(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = self
            .profiles()
            .delete_one(doc! { "userId": user_id }, None)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to delete user profile");
                StoreError::from(e)
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        ping(&self.client).await
    }
}
