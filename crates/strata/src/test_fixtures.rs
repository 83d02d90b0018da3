//! Shared fixture universe for tests: a small content domain (authors,
//! posts, tags) with a relationship cycle between authors and posts, plus a
//! scriptable remote store.

use crate::{
    db::{
        context::ReadContext,
        manager::CoreManager,
        query::Query,
        relation::RelationSource,
        store::{
            MemoryStore, ResponseSource, SourceMetadata, Stack, Store, StoreLevel, StoreRead,
        },
    },
    error::Error,
    traits::{Entity, EntityUnion, NoExtras, RelationRef},
    types::{Identifier, Lazy, RemoteId},
    value::Value,
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
};

///
/// RecordKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) enum RecordKind {
    Author,
    Post,
    Tag,
}

///
/// Author
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Author {
    pub id: Identifier,
    pub name: String,
    pub posts: Vec<Identifier>,
    pub bio: Lazy<String>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum AuthorExtra {
    Bio,
}

impl Author {
    pub fn new(id: Identifier, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            posts: Vec::new(),
            bio: Lazy::Unrequested,
        }
    }

    pub fn with_posts(mut self, posts: Vec<Identifier>) -> Self {
        self.posts = posts;
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Lazy::Requested(bio.into());
        self
    }
}

impl Entity for Author {
    type Extra = AuthorExtra;
    type Union = AnyRecord;

    const PATH: &'static str = "author";

    fn kind() -> RecordKind {
        RecordKind::Author
    }

    fn identifier(&self) -> Identifier {
        self.id
    }

    fn adopt_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::Text(self.name.clone())),
            _ => None,
        }
    }

    fn extra_requested(&self, extra: AuthorExtra) -> bool {
        match extra {
            AuthorExtra::Bio => self.bio.is_requested(),
        }
    }

    fn retain_extras_from(&mut self, local: &Self) {
        self.bio.retain_requested(&local.bio);
    }
}

///
/// Post
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Post {
    pub id: Identifier,
    pub title: String,
    pub stars: i64,
    pub author: Option<Identifier>,
    pub tags: Vec<Identifier>,
    pub body: Lazy<String>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum PostExtra {
    Body,
}

impl Post {
    pub fn new(id: Identifier, title: impl Into<String>, stars: i64) -> Self {
        Self {
            id,
            title: title.into(),
            stars,
            author: None,
            tags: Vec::new(),
            body: Lazy::Unrequested,
        }
    }

    pub fn by(mut self, author: Identifier) -> Self {
        self.author = Some(author);
        self
    }

    pub fn with_tags(mut self, tags: Vec<Identifier>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Lazy::Requested(body.into());
        self
    }
}

impl Entity for Post {
    type Extra = PostExtra;
    type Union = AnyRecord;

    const PATH: &'static str = "post";

    fn kind() -> RecordKind {
        RecordKind::Post
    }

    fn identifier(&self) -> Identifier {
        self.id
    }

    fn adopt_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "title" => Some(Value::Text(self.title.clone())),
            "stars" => Some(Value::Int(self.stars)),
            "author" => self.author.map(Value::Id),
            _ => None,
        }
    }

    fn extra_requested(&self, extra: PostExtra) -> bool {
        match extra {
            PostExtra::Body => self.body.is_requested(),
        }
    }

    fn retain_extras_from(&mut self, local: &Self) {
        self.body.retain_requested(&local.body);
    }
}

///
/// Tag
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Tag {
    pub id: Identifier,
    pub label: String,
}

impl Tag {
    pub fn new(id: Identifier, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

impl Entity for Tag {
    type Extra = NoExtras;
    type Union = AnyRecord;

    const PATH: &'static str = "tag";

    fn kind() -> RecordKind {
        RecordKind::Tag
    }

    fn identifier(&self) -> Identifier {
        self.id
    }

    fn adopt_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "label" => Some(Value::Text(self.label.clone())),
            _ => None,
        }
    }

    fn extra_requested(&self, extra: NoExtras) -> bool {
        match extra {}
    }

    fn retain_extras_from(&mut self, _local: &Self) {}
}

///
/// AnyRecord
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum AnyRecord {
    Author(Author),
    Post(Post),
    Tag(Tag),
}

impl EntityUnion for AnyRecord {
    type Kind = RecordKind;

    fn kind(&self) -> RecordKind {
        match self {
            Self::Author(_) => RecordKind::Author,
            Self::Post(_) => RecordKind::Post,
            Self::Tag(_) => RecordKind::Tag,
        }
    }

    fn identifier(&self) -> Identifier {
        match self {
            Self::Author(author) => author.id,
            Self::Post(post) => post.id,
            Self::Tag(tag) => tag.id,
        }
    }

    fn adopt_identifier(&mut self, id: Identifier) {
        match self {
            Self::Author(author) => author.id = id,
            Self::Post(post) => post.id = id,
            Self::Tag(tag) => tag.id = id,
        }
    }

    fn relationships(&self) -> Vec<RelationRef<RecordKind>> {
        match self {
            Self::Author(author) => {
                vec![RelationRef::new("posts", RecordKind::Post, author.posts.clone())]
            }
            Self::Post(post) => {
                let mut relations = Vec::new();
                if let Some(author) = post.author {
                    relations.push(RelationRef::new("author", RecordKind::Author, vec![author]));
                }
                relations.push(RelationRef::new("tags", RecordKind::Tag, post.tags.clone()));
                relations
            }
            Self::Tag(_) => Vec::new(),
        }
    }

    fn merge_from(&mut self, newer: Self) {
        if self.kind() != newer.kind() {
            *self = newer;
            return;
        }
        match (&mut *self, newer) {
            (Self::Author(held), Self::Author(mut new)) => {
                new.bio.retain_requested(&held.bio);
                *held = new;
            }
            (Self::Post(held), Self::Post(mut new)) => {
                new.body.retain_requested(&held.body);
                *held = new;
            }
            (Self::Tag(held), Self::Tag(new)) => *held = new,
            _ => unreachable!("kind equality checked above"),
        }
    }
}

impl From<Author> for AnyRecord {
    fn from(author: Author) -> Self {
        Self::Author(author)
    }
}

impl From<Post> for AnyRecord {
    fn from(post: Post) -> Self {
        Self::Post(post)
    }
}

impl From<Tag> for AnyRecord {
    fn from(tag: Tag) -> Self {
        Self::Tag(tag)
    }
}

impl TryFrom<AnyRecord> for Author {
    type Error = ();

    fn try_from(any: AnyRecord) -> Result<Self, ()> {
        match any {
            AnyRecord::Author(author) => Ok(author),
            _ => Err(()),
        }
    }
}

impl TryFrom<AnyRecord> for Post {
    type Error = ();

    fn try_from(any: AnyRecord) -> Result<Self, ()> {
        match any {
            AnyRecord::Post(post) => Ok(post),
            _ => Err(()),
        }
    }
}

impl TryFrom<AnyRecord> for Tag {
    type Error = ();

    fn try_from(any: AnyRecord) -> Result<Self, ()> {
        match any {
            AnyRecord::Tag(tag) => Ok(tag),
            _ => Err(()),
        }
    }
}

// ----------------------------------------------------------------------
// Identifier shorthands
// ----------------------------------------------------------------------

pub(crate) fn rid(value: i64) -> Identifier {
    Identifier::remote(RemoteId::new(value))
}

///
/// RemoteStub
///
/// Scripted remote store: `search` pops the next queued response, `set`
/// assigns remote identifiers to locally-minted entities the way a server
/// would. Records every search query for assertions.
///

pub(crate) struct RemoteStub<E: Entity> {
    responses: Mutex<VecDeque<Result<Vec<E>, Error>>>,
    queries: Mutex<Vec<Query<E>>>,
    next_remote_id: AtomicI64,
    sets: AtomicUsize,
}

impl<E: Entity> RemoteStub<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            next_remote_id: AtomicI64::new(1_000),
            sets: AtomicUsize::new(0),
        })
    }

    pub fn respond_with(&self, entities: Vec<E>) {
        self.responses.lock().unwrap().push_back(Ok(entities));
    }

    pub fn fail_with(&self, err: Error) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    pub fn search_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn searches(&self) -> Vec<Query<E>> {
        self.queries.lock().unwrap().clone()
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Entity> Store<E> for RemoteStub<E> {
    fn level(&self) -> StoreLevel {
        StoreLevel::Remote
    }

    async fn get(
        &self,
        id: &Identifier,
        ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Option<E>>, Error> {
        let read = self.search(&Query::one(*id), ctx).await?;

        Ok(StoreRead {
            value: read.value.into_iter().next(),
            source: read.source,
        })
    }

    async fn search(
        &self,
        query: &Query<E>,
        _ctx: &ReadContext<E::Union>,
    ) -> Result<StoreRead<Vec<E>>, Error> {
        self.queries.lock().unwrap().push(query.clone());
        let scripted = self.responses.lock().unwrap().pop_front();

        let entities = match scripted {
            Some(Ok(entities)) => entities,
            Some(Err(err)) => return Err(err),
            None => Vec::new(),
        };

        Ok(StoreRead::remote(
            entities,
            ResponseSource::Server(SourceMetadata::new("test-endpoint")),
        ))
    }

    async fn set(&self, entities: Vec<E>) -> Result<Vec<E>, Error> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(entities
            .into_iter()
            .map(|mut entity| {
                let id = entity.identifier();
                if let (None, Some(local)) = (id.remote_id(), id.local_id()) {
                    let assigned = RemoteId::new(self.next_remote_id.fetch_add(1, Ordering::SeqCst));
                    entity.adopt_identifier(Identifier::remote_with_local(assigned, local));
                }
                entity
            })
            .collect())
    }

    async fn remove(&self, ids: &[Identifier]) -> Result<Vec<Identifier>, Error> {
        Ok(ids.to_vec())
    }

    async fn remove_all(&self, _query: &Query<E>) -> Result<Vec<Identifier>, Error> {
        Ok(Vec::new())
    }
}

// ----------------------------------------------------------------------
// Manager construction helpers
// ----------------------------------------------------------------------

/// Manager over a memory store only.
pub(crate) fn local_manager<E: Entity>() -> (CoreManager<E>, Arc<MemoryStore<E>>) {
    let memory = Arc::new(MemoryStore::new());
    let stack = Stack::new(vec![memory.clone() as Arc<dyn Store<E>>]).unwrap();

    (CoreManager::new(stack), memory)
}

/// Manager over a memory store plus a scripted remote store.
pub(crate) fn blended_manager<E: Entity>(
    remote: Arc<RemoteStub<E>>,
) -> (CoreManager<E>, Arc<MemoryStore<E>>) {
    let memory = Arc::new(MemoryStore::new());
    let stack = Stack::new(vec![
        memory.clone() as Arc<dyn Store<E>>,
        remote as Arc<dyn Store<E>>,
    ])
    .unwrap();

    (CoreManager::new(stack), memory)
}

/// Seed entities straight into a memory store.
pub(crate) async fn seed<E: Entity>(memory: &MemoryStore<E>, entities: Vec<E>) {
    memory.set(entities).await.unwrap();
}

///
/// FixtureSource
///
/// Relation-source dispatch over per-type managers, counting batch fetches.
///

pub(crate) struct FixtureSource {
    pub authors: CoreManager<Author>,
    pub posts: CoreManager<Post>,
    pub tags: CoreManager<Tag>,
    pub calls: Mutex<Vec<(RecordKind, usize)>>,
}

impl FixtureSource {
    pub fn new(
        authors: CoreManager<Author>,
        posts: CoreManager<Post>,
        tags: CoreManager<Tag>,
    ) -> Arc<Self> {
        Arc::new(Self {
            authors,
            posts,
            tags,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, kind: RecordKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == kind)
            .count()
    }
}

#[async_trait]
impl RelationSource<AnyRecord> for FixtureSource {
    async fn get_by_ids(
        &self,
        kind: RecordKind,
        ids: Vec<Identifier>,
        ctx: &ReadContext<AnyRecord>,
    ) -> Result<Vec<AnyRecord>, Error> {
        self.calls.lock().unwrap().push((kind, ids.len()));

        match kind {
            RecordKind::Author => Ok(self
                .authors
                .get_by_ids(ids, ctx)
                .await?
                .into_entities()
                .into_iter()
                .map(Into::into)
                .collect()),
            RecordKind::Post => Ok(self
                .posts
                .get_by_ids(ids, ctx)
                .await?
                .into_entities()
                .into_iter()
                .map(Into::into)
                .collect()),
            RecordKind::Tag => Ok(self
                .tags
                .get_by_ids(ids, ctx)
                .await?
                .into_entities()
                .into_iter()
                .map(Into::into)
                .collect()),
        }
    }
}
