//! Document store unit of work backed by Redis.
//!
//! Each collection lives in one hash `{database}:{collection}`; the field is
//! the entity id and the value the JSON document. The connection is opened
//! on first use against the first reachable node.

use std::marker::PhantomData;

use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use common::{DocumentStoreConfig, StoreError, StoreResult};
use domain::{Entity, DOCUMENT_KEY_SEPARATOR};

use crate::lifecycle::Completable;

/// An entity that can be stored as a JSON document.
pub trait Document: Entity + Serialize + DeserializeOwned + Send + Sync {
    /// Collection the documents are grouped in
    const COLLECTION: &'static str;
}

/// Hash key of a collection within a logical database.
pub fn collection_key(database: &str, collection: &str) -> String {
    format!("{}{}{}", database, DOCUMENT_KEY_SEPARATOR, collection)
}

/// Hash field and JSON value a document is stored as.
fn encode<D: Document>(document: &D) -> StoreResult<(String, String)> {
    Ok((document.entity_key(), serde_json::to_string(document)?))
}

/// Decode stored values, keeping those matching `predicate`.
fn decode_matching<D, F>(values: Vec<String>, predicate: F) -> StoreResult<Vec<D>>
where
    D: Document,
    F: Fn(&D) -> bool,
{
    let mut documents = Vec::with_capacity(values.len());
    for json in values {
        let document: D = serde_json::from_str(&json)?;
        if predicate(&document) {
            documents.push(document);
        }
    }
    Ok(documents)
}

/// At most one document, or [`StoreError::MultipleMatches`].
fn single<D: Document>(mut matches: Vec<D>) -> StoreResult<Option<D>> {
    if matches.len() > 1 {
        return Err(StoreError::multiple_matches(D::COLLECTION));
    }
    Ok(matches.pop())
}

/// Unit of work over a Redis document store.
pub struct DocumentUnitOfWork {
    nodes: Vec<String>,
    database: String,
    connection: Mutex<Option<ConnectionManager>>,
}

impl DocumentUnitOfWork {
    /// Create a unit of work. No connection is opened yet.
    pub fn new<I, S>(nodes: I, database: impl Into<String>) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        if nodes.iter().all(|node| node.trim().is_empty()) {
            return Err(StoreError::configuration("No document store nodes given"));
        }

        let database = database.into();
        if database.trim().is_empty() {
            return Err(StoreError::configuration("No document database given"));
        }

        Ok(Self {
            nodes,
            database,
            connection: Mutex::new(None),
        })
    }

    pub fn from_config(config: &DocumentStoreConfig) -> StoreResult<Self> {
        Self::new(config.nodes.iter().cloned(), config.database.clone())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    fn key<D: Document>(&self) -> String {
        collection_key(&self.database, D::COLLECTION)
    }

    /// Shared connection, opened on first call.
    async fn connection(&self) -> StoreResult<ConnectionManager> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        let connection = self.open().await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    async fn open(&self) -> StoreResult<ConnectionManager> {
        let mut last_error = None;

        for node in self.nodes.iter().filter(|node| !node.trim().is_empty()) {
            let attempt = match Client::open(node.as_str()) {
                Ok(client) => ConnectionManager::new(client).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(connection) => {
                    tracing::info!(node = %node, database = %self.database, "Document store connected");
                    return Ok(connection);
                }
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "Document store node unreachable");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(StoreError::configuration("No document store nodes given")),
        }
    }

    /// Store (insert or replace) a document.
    pub async fn store<D: Document>(&self, document: &D) -> StoreResult<()> {
        let (field, json) = encode(document)?;
        let mut conn = self.connection().await?;

        conn.hset::<_, _, _, ()>(self.key::<D>(), field, json).await?;
        Ok(())
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete<D: Document>(&self, document: &D) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.hdel(self.key::<D>(), document.entity_key()).await?;
        Ok(())
    }

    /// Load a document by id.
    pub async fn load<D: Document>(&self, id: &D::Id) -> StoreResult<Option<D>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.hget(self.key::<D>(), id.to_string()).await?;

        value
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    /// All documents of the collection matching `predicate`.
    pub async fn filter<D, F>(&self, predicate: F) -> StoreResult<Vec<D>>
    where
        D: Document,
        F: Fn(&D) -> bool + Send,
    {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn.hvals(self.key::<D>()).await?;

        decode_matching(values, predicate)
    }

    /// The single document matching `predicate`, if any.
    ///
    /// Fails with [`StoreError::MultipleMatches`] when more than one matches.
    pub async fn single_or_default<D, F>(&self, predicate: F) -> StoreResult<Option<D>>
    where
        D: Document,
        F: Fn(&D) -> bool + Send,
    {
        single(self.filter(predicate).await?)
    }

    /// Release the connection. The next operation reconnects.
    pub async fn release(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::info!(database = %self.database, "Document store connection released");
        }
    }
}

#[async_trait::async_trait]
impl Completable for DocumentUnitOfWork {
    /// Every write is applied immediately; completing only releases the
    /// connection.
    async fn complete(&self) -> StoreResult<()> {
        self.release().await;
        Ok(())
    }
}

/// Typed repository over one document collection.
pub struct DocumentRepository<'a, D: Document> {
    unit: &'a DocumentUnitOfWork,
    _document: PhantomData<fn() -> D>,
}

impl<'a, D: Document> DocumentRepository<'a, D> {
    pub fn new(unit: &'a DocumentUnitOfWork) -> Self {
        Self {
            unit,
            _document: PhantomData,
        }
    }

    pub async fn get<F>(&self, predicate: F) -> StoreResult<Option<D>>
    where
        F: Fn(&D) -> bool + Send,
    {
        self.unit.single_or_default(predicate).await
    }

    pub async fn get_by_id(&self, id: &D::Id) -> StoreResult<Option<D>> {
        self.unit.load(id).await
    }

    pub async fn get_all<F>(&self, predicate: F) -> StoreResult<Vec<D>>
    where
        F: Fn(&D) -> bool + Send,
    {
        self.unit.filter(predicate).await
    }

    pub async fn store(&self, document: &D) -> StoreResult<()> {
        self.unit.store(document).await
    }

    pub async fn delete(&self, document: &D) -> StoreResult<()> {
        self.unit.delete(document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::entities::person::sample_people;
    use crate::repository::entities::Person;

    #[test]
    fn test_collection_key() {
        assert_eq!(collection_key("x3", "people"), "x3:people");
    }

    #[test]
    fn test_person_collection() {
        assert_eq!(<Person as Document>::COLLECTION, "people");
    }

    #[test]
    fn test_requires_nodes() {
        let result = DocumentUnitOfWork::new(Vec::<String>::new(), "x3");
        assert!(matches!(result, Err(StoreError::Configuration(_))));

        let result = DocumentUnitOfWork::new(["  "], "x3");
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_requires_database() {
        let result = DocumentUnitOfWork::new(["redis://127.0.0.1:6379"], "");
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_construction_is_lazy() {
        let unit = DocumentUnitOfWork::new(["redis://127.0.0.1:1"], "x3").unwrap();

        assert!(!unit.is_open().await);
        unit.complete().await.unwrap();
        assert!(!unit.is_open().await);
    }

    fn stored(people: &[Person]) -> Vec<String> {
        people.iter().map(|p| encode(p).unwrap().1).collect()
    }

    #[test]
    fn test_encode_uses_entity_key_as_field() {
        let person = sample_people(1).remove(0);

        let (field, json) = encode(&person).unwrap();

        assert_eq!(field, person.entity_id.to_string());
        let decoded: Person = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, person);
    }

    #[test]
    fn test_decode_keeps_matching_documents() {
        let people = sample_people(4);

        let odd: Vec<Person> = decode_matching(stored(&people), |p: &Person| {
            matches!(p.name.as_deref(), Some("Name-1") | Some("Name-3"))
        })
        .unwrap();

        assert_eq!(odd, vec![people[1].clone(), people[3].clone()]);
    }

    #[test]
    fn test_decode_rejects_malformed_value() {
        let result = decode_matching::<Person, _>(vec!["{not json".to_string()], |_| true);

        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn test_single_match_selection() {
        let people = sample_people(2);

        assert_eq!(single::<Person>(Vec::new()).unwrap(), None);
        assert_eq!(
            single(vec![people[0].clone()]).unwrap(),
            Some(people[0].clone())
        );
        assert!(matches!(
            single(people),
            Err(StoreError::MultipleMatches { entity }) if entity == "people"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_and_stays_closed() {
        let unit = DocumentUnitOfWork::new(["", "redis://127.0.0.1:1"], "x3").unwrap();
        let person = sample_people(1).remove(0);

        assert!(unit.store(&person).await.is_err());
        assert!(!unit.is_open().await);
    }

    #[test]
    fn test_from_config() {
        let config = DocumentStoreConfig {
            nodes: vec!["redis://a:6379".to_string()],
            database: "archive".to_string(),
        };

        let unit = DocumentUnitOfWork::from_config(&config).unwrap();
        assert_eq!(unit.database(), "archive");
        assert_eq!(unit.key::<Person>(), "archive:people");
    }
}
