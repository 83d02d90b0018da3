use crate::{
    db::{
        context::{Contract, ReadContext, WriteContext},
        manager::CoreManager,
        query::Query,
        relation::{
            EntityGraph, FetchOutcome, Recursion, RelationController, RelationPath,
            RelationSource, TraversalPlan,
        },
    },
    error::Error,
    test_fixtures::{
        AnyRecord, Author, FixtureSource, Post, RecordKind, RemoteStub, Tag, blended_manager,
        local_manager, rid, seed,
    },
    traits::EntityUnion,
    types::Identifier,
};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::Arc;

fn ctx() -> ReadContext<AnyRecord> {
    ReadContext::local()
}

fn posts_path() -> RelationPath<RecordKind> {
    RelationPath::step(RecordKind::Author, "posts")
}

struct Fixture {
    authors: CoreManager<Author>,
    source: Arc<FixtureSource>,
}

async fn fixture(authors: Vec<Author>, posts: Vec<Post>, tags: Vec<Tag>) -> Fixture {
    let (author_manager, author_memory) = local_manager::<Author>();
    let (post_manager, post_memory) = local_manager::<Post>();
    let (tag_manager, tag_memory) = local_manager::<Tag>();

    seed(&author_memory, authors).await;
    seed(&post_memory, posts).await;
    seed(&tag_memory, tags).await;

    let source = FixtureSource::new(author_manager.clone(), post_manager, tag_manager);

    Fixture {
        authors: author_manager,
        source,
    }
}

fn controller(source: Arc<FixtureSource>, plan: TraversalPlan<AnyRecord>) -> RelationController<AnyRecord> {
    RelationController::new(source, plan)
}

// A → B → A cycle resolves with exactly two batch fetches and no further
// calls; both entities end up in the graph.
#[tokio::test]
async fn cycle_resolves_with_exactly_two_batches() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5).by(rid(1));
    let fx = fixture(vec![author.clone()], vec![post], vec![]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.call_count(), 2);
    assert_eq!(fx.source.calls_for(RecordKind::Post), 1);
    assert_eq!(fx.source.calls_for(RecordKind::Author), 1);
    assert_eq!(graph.len(), 2);
    assert!(graph.contains(RecordKind::Author, &rid(1)));
    assert!(graph.contains(RecordKind::Post, &rid(10)));
}

// Every identifier referenced by an in-graph entity's relationship fields
// is itself present after a full traversal.
#[tokio::test]
async fn full_traversal_closes_over_references() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10), rid(11)]);
    let posts = vec![
        Post::new(rid(10), "alpha", 5).by(rid(1)).with_tags(vec![rid(20)]),
        Post::new(rid(11), "beta", 3).by(rid(1)).with_tags(vec![rid(20), rid(21)]),
    ];
    let tags = vec![Tag::new(rid(20), "t20"), Tag::new(rid(21), "t21")];
    let fx = fixture(vec![author.clone()], posts, tags).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    for kind in [RecordKind::Author, RecordKind::Post, RecordKind::Tag] {
        for entity in graph.of_kind(kind) {
            for relation in entity.relationships() {
                for id in &relation.ids {
                    assert!(
                        graph.contains(relation.target, id),
                        "missing {:?} {id}",
                        relation.target
                    );
                }
            }
        }
    }
}

// Ids for the same (path, entity type) coalesce into one batch even when
// they come from different roots.
#[tokio::test]
async fn batches_coalesce_across_roots() {
    let ada = Author::new(rid(1), "ada").with_posts(vec![rid(10), rid(11)]);
    let lin = Author::new(rid(2), "lin").with_posts(vec![rid(11), rid(12)]);
    let posts = vec![
        Post::new(rid(10), "alpha", 1),
        Post::new(rid(11), "beta", 2),
        Post::new(rid(12), "gamma", 3),
    ];
    let fx = fixture(vec![ada.clone(), lin.clone()], posts, vec![]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let graph = controller
        .assemble(vec![ada.into(), lin.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.call_count(), 1);
    let batches = fx.source.calls.lock().unwrap().clone();
    assert_eq!(batches, vec![(RecordKind::Post, 3)]);
    assert_eq!(graph.all_of::<Post>().len(), 3);
}

#[tokio::test]
async fn recursion_none_resolves_direct_relationships_only() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5).by(rid(1)).with_tags(vec![rid(20)]);
    let fx = fixture(vec![author.clone()], vec![post], vec![Tag::new(rid(20), "t")]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::None),
    );
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.call_count(), 1);
    assert_eq!(fx.source.calls_for(RecordKind::Post), 1);
    assert_eq!(fx.source.calls_for(RecordKind::Tag), 0);
    assert!(graph.contains(RecordKind::Post, &rid(10)));
    assert!(!graph.contains(RecordKind::Tag, &rid(20)));
}

#[tokio::test]
async fn recursion_depth_bounds_traversal_levels() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5).with_tags(vec![rid(20)]);
    let fx = fixture(vec![author.clone()], vec![post], vec![Tag::new(rid(20), "t")]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Depth(1)),
    );
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    // Depth(1): the posts level, then one further level (tags), then stop.
    assert!(graph.contains(RecordKind::Tag, &rid(20)));
    assert_eq!(fx.source.calls_for(RecordKind::Tag), 1);
}

#[tokio::test]
async fn excluding_a_path_prunes_its_subtree() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5).by(rid(1)).with_tags(vec![rid(20)]);
    let fx = fixture(vec![author.clone()], vec![post], vec![Tag::new(rid(20), "t")]).await;

    let plan = TraversalPlan::including_all_relationships(Recursion::Full)
        .excluding(posts_path().child(crate::db::relation::PathStep::new(RecordKind::Post, "tags")));
    let controller = controller(fx.source.clone(), plan);
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.calls_for(RecordKind::Tag), 0);
    assert!(!graph.contains(RecordKind::Tag, &rid(20)));
    // The non-excluded cycle back to the author still resolved.
    assert!(graph.contains(RecordKind::Author, &rid(1)));
}

#[tokio::test]
async fn explicit_includes_traverse_only_their_chain() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5).by(rid(1)).with_tags(vec![rid(20)]);
    let fx = fixture(vec![author.clone()], vec![post], vec![Tag::new(rid(20), "t")]).await;

    let plan = TraversalPlan::new().including(posts_path());
    let controller = controller(fx.source.clone(), plan);
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.call_count(), 1);
    assert!(graph.contains(RecordKind::Post, &rid(10)));
    assert!(!graph.contains(RecordKind::Tag, &rid(20)));
}

#[tokio::test]
async fn fetcher_skip_issues_no_fetch() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let fx = fixture(vec![author.clone()], vec![], vec![]).await;

    let plan = TraversalPlan::including_all_relationships(Recursion::Full)
        .with_fetcher(posts_path(), |_, _| FetchOutcome::Skip);
    let controller = controller(fx.source.clone(), plan);
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.call_count(), 0);
    assert_eq!(graph.len(), 1);
}

#[tokio::test]
async fn fetcher_filtered_replaces_the_id_set() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10), rid(11)]);
    let posts = vec![
        Post::new(rid(10), "alpha", 1).by(rid(1)),
        Post::new(rid(11), "beta", 2).by(rid(1)),
    ];
    let fx = fixture(vec![author.clone()], posts, vec![]).await;

    let plan = TraversalPlan::including_all_relationships(Recursion::Full).with_fetcher(
        posts_path(),
        |_, ids| FetchOutcome::Filtered {
            ids: ids.into_iter().take(1).collect(),
            recursion: Recursion::None,
            ctx: None,
        },
    );
    let controller = controller(fx.source.clone(), plan);
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    let batches = fx.source.calls.lock().unwrap().clone();
    assert_eq!(batches, vec![(RecordKind::Post, 1)]);
    assert!(graph.contains(RecordKind::Post, &rid(10)));
    assert!(!graph.contains(RecordKind::Post, &rid(11)));
    // Recursion::None from the fetcher: the fetched post's author is not
    // re-fetched (the root is already present, and no author batch ran).
    assert_eq!(fx.source.calls_for(RecordKind::Author), 0);
}

#[tokio::test]
async fn fetcher_ready_supplies_results_in_place_of_a_fetch() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let fx = fixture(vec![author.clone()], vec![], vec![]).await;

    let supplied = Post::new(rid(10), "supplied", 9);
    let plan = TraversalPlan::including_all_relationships(Recursion::Full).with_fetcher(
        posts_path(),
        move |_, _| {
            let post = supplied.clone();
            FetchOutcome::Ready(async move { Ok(vec![AnyRecord::Post(post)]) }.boxed())
        },
    );
    let controller = controller(fx.source.clone(), plan);
    let graph = controller
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(fx.source.calls_for(RecordKind::Post), 0);
    let held: Post = graph.get(&rid(10)).unwrap();
    assert_eq!(held.title, "supplied");
}

///
/// FailingSource
///

struct FailingSource;

#[async_trait]
impl RelationSource<AnyRecord> for FailingSource {
    async fn get_by_ids(
        &self,
        _kind: RecordKind,
        _ids: Vec<Identifier>,
        _ctx: &ReadContext<AnyRecord>,
    ) -> Result<Vec<AnyRecord>, Error> {
        Err(Error::network("relation fetch refused"))
    }
}

#[tokio::test]
async fn batch_failure_fails_the_traversal_unless_skipped() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);

    let failing = RelationController::new(
        Arc::new(FailingSource),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let err = failing
        .assemble(vec![author.clone().into()], false, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));

    let skipping = RelationController::new(
        Arc::new(FailingSource),
        TraversalPlan::including_all_relationships(Recursion::Full)
            .with_fetcher(posts_path(), |_, _| FetchOutcome::Skip),
    );
    let graph = skipping
        .assemble(vec![author.into()], false, &ctx())
        .await
        .unwrap();
    assert_eq!(graph.len(), 1);
}

///
/// MinStars
///

struct MinStars(i64);

impl Contract<AnyRecord> for MinStars {
    fn should_validate(&self, kind: RecordKind) -> bool {
        kind == RecordKind::Post
    }

    fn is_entity_valid(&self, entity: &AnyRecord) -> bool {
        match entity {
            AnyRecord::Post(post) => post.stars >= self.0,
            _ => true,
        }
    }
}

#[tokio::test]
async fn contract_drops_invalid_entities_before_insertion() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10), rid(11)]);
    let posts = vec![
        Post::new(rid(10), "alpha", 10),
        Post::new(rid(11), "beta", 2),
    ];
    let fx = fixture(vec![author.clone()], posts, vec![]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let read_ctx = ctx().with_contract(Arc::new(MinStars(5)));
    let graph = controller
        .assemble(vec![author.into()], false, &read_ctx)
        .await
        .unwrap();

    assert!(graph.contains(RecordKind::Post, &rid(10)));
    assert!(!graph.contains(RecordKind::Post, &rid(11)));
}

#[tokio::test]
async fn graph_is_tagged_remote_when_any_fetch_was_served_remotely() {
    let (author_manager, author_memory) = local_manager::<Author>();
    let remote = RemoteStub::new();
    remote.respond_with(vec![Post::new(rid(10), "alpha", 5)]);
    let (post_manager, _post_memory) = blended_manager::<Post>(remote);
    let (tag_manager, _tag_memory) = local_manager::<Tag>();

    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    seed(&author_memory, vec![author.clone()]).await;

    let source = FixtureSource::new(author_manager, post_manager, tag_manager);
    let controller = RelationController::new(
        source,
        TraversalPlan::including_all_relationships(Recursion::None),
    );

    let read_ctx: ReadContext<AnyRecord> = ReadContext::local_or_remote();
    let graph = controller
        .assemble(vec![author.into()], false, &read_ctx)
        .await
        .unwrap();

    assert!(graph.is_data_remote());
    assert!(graph.contains(RecordKind::Post, &rid(10)));
}

#[tokio::test(start_paused = true)]
async fn graph_stream_follows_root_updates() {
    let fx = fixture(vec![], vec![Post::new(rid(10), "alpha", 5)], vec![]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );

    let roots = fx.authors.search(Query::all(), &ReadContext::local());
    let mut graphs = controller.stream(roots, &ctx());

    let initial = graphs.once.result().await.unwrap();
    assert!(initial.is_empty());

    fx.authors
        .set(
            vec![Author::new(rid(1), "ada").with_posts(vec![rid(10)])],
            &WriteContext::local(),
        )
        .await
        .unwrap();

    // First continuous value is the initial (empty) graph; the next one
    // reflects the new root and its resolved post.
    let first = graphs.continuous.next().await.unwrap().unwrap();
    assert!(first.same_entities(&initial));

    let updated = graphs.continuous.next().await.unwrap().unwrap();
    assert!(updated.contains(RecordKind::Author, &rid(1)));
    assert!(updated.contains(RecordKind::Post, &rid(10)));
}

#[tokio::test]
async fn typed_accessors_expose_concrete_entities() {
    let author = Author::new(rid(1), "ada").with_posts(vec![rid(10)]);
    let post = Post::new(rid(10), "alpha", 5);
    let fx = fixture(vec![author.clone()], vec![post.clone()], vec![]).await;

    let controller = controller(
        fx.source.clone(),
        TraversalPlan::including_all_relationships(Recursion::Full),
    );
    let graph: EntityGraph<AnyRecord> = controller
        .assemble(vec![author.clone().into()], false, &ctx())
        .await
        .unwrap();

    assert_eq!(graph.get::<Post>(&rid(10)), Some(post));
    assert_eq!(graph.all_of::<Author>(), vec![author]);
}
