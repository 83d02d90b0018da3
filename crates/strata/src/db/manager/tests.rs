use crate::{
    db::{
        context::{ExtraLocalData, ReadContext, WriteContext},
        query::Query,
        store::Store,
    },
    error::Error,
    test_fixtures::{Post, PostExtra, RemoteStub, blended_manager, local_manager, rid, seed},
    traits::Entity,
    types::{Identifier, Lazy, LocalId},
};
use std::time::Duration;
use tokio::time::timeout;

const QUIET: Duration = Duration::from_millis(50);

#[tokio::test]
async fn set_then_get_round_trips_locally() {
    let (manager, _memory) = local_manager::<Post>();
    let post = Post::new(rid(1), "alpha", 10).with_body("text");

    manager
        .set(vec![post.clone()], &WriteContext::local())
        .await
        .unwrap();

    let result = manager
        .get(&rid(1), [PostExtra::Body], &ReadContext::local())
        .result()
        .await
        .unwrap();

    assert_eq!(result.entity(), Some(&post));
    assert!(!result.is_data_remote());
}

#[tokio::test]
async fn search_round_trips_all_written_entities() {
    let (manager, _memory) = local_manager::<Post>();
    let posts = vec![
        Post::new(rid(1), "alpha", 10),
        Post::new(rid(2), "beta", 3),
        Post::new(rid(3), "gamma", 7),
    ];
    manager
        .set(posts.clone(), &WriteContext::local())
        .await
        .unwrap();

    let result = manager
        .search(
            Query::all().sort_asc("title"),
            &ReadContext::local(),
        )
        .result()
        .await
        .unwrap();

    let mut expected = posts;
    expected.sort_by(|a, b| a.title.cmp(&b.title));
    assert_eq!(result.into_entities(), expected);
}

// Local get with a selected extra in unrequested state filters the entity
// out entirely; there is no remote fallback for `DataSource::Local`.
#[tokio::test]
async fn local_get_with_unrequested_extra_is_empty() {
    let (manager, memory) = local_manager::<Post>();
    seed(&memory, vec![Post::new(rid(1), "alpha", 10)]).await;

    let result = manager
        .get(&rid(1), [PostExtra::Body], &ReadContext::local())
        .result()
        .await
        .unwrap();

    assert!(result.is_empty());
}

// Trusted remote filtering: a remote payload whose entities fail the extras
// requirement yields an empty result, with no fallback to local data.
#[tokio::test]
async fn trusted_remote_without_extras_stays_empty() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![
        Post::new(rid(1), "alpha", 10),
        Post::new(rid(2), "beta", 3),
    ]);
    let (manager, memory) = blended_manager(remote.clone());
    // Local copies would satisfy the extras; they must not be consulted.
    seed(
        &memory,
        vec![
            Post::new(rid(1), "alpha", 10).with_body("local"),
            Post::new(rid(2), "beta", 3).with_body("local"),
        ],
    )
    .await;

    let ctx = ReadContext::remote()
        .do_not_persist()
        .trusting_remote_filtering();
    let result = manager
        .search(
            Query::many(vec![rid(1), rid(2)]).with_extras([PostExtra::Body]),
            &ctx,
        )
        .result()
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(remote.search_count(), 1);
}

// local-or(remote) get-by-ids: the local result is incomplete (one entity
// lacks the extra), so the remote result wins and is persisted.
#[tokio::test]
async fn local_or_remote_blends_and_persists() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![
        Post::new(rid(1), "alpha", 10).with_body("9"),
        Post::new(rid(2), "beta", 3).with_body("5"),
    ]);
    let (manager, memory) = blended_manager(remote.clone());
    seed(
        &memory,
        vec![
            Post::new(rid(1), "alpha", 10),
            Post::new(rid(2), "beta", 3).with_body("5"),
        ],
    )
    .await;

    let result = manager
        .search(
            Query::many(vec![rid(1), rid(2)]).with_extras([PostExtra::Body]),
            &ReadContext::local_or_remote(),
        )
        .result()
        .await
        .unwrap();

    assert_eq!(result.count(), 2);
    assert!(result
        .entities()
        .iter()
        .all(|post| post.body.is_requested()));
    assert!(result.is_data_remote());

    // The memory store now holds the remote payload for post 1.
    let held = memory
        .get(&rid(1), &ReadContext::local())
        .await
        .unwrap()
        .value
        .unwrap();
    assert_eq!(held.body, Lazy::Requested("9".into()));
}

#[tokio::test]
async fn local_or_complete_local_result_skips_remote() {
    let remote = RemoteStub::new();
    let (manager, memory) = blended_manager(remote.clone());
    seed(
        &memory,
        vec![
            Post::new(rid(1), "alpha", 10).with_body("a"),
            Post::new(rid(2), "beta", 3).with_body("b"),
        ],
    )
    .await;

    let result = manager
        .search(
            Query::many(vec![rid(1), rid(2)]).with_extras([PostExtra::Body]),
            &ReadContext::local_or_remote(),
        )
        .result()
        .await
        .unwrap();

    assert_eq!(result.count(), 2);
    assert!(!result.is_data_remote());
    assert_eq!(remote.search_count(), 0);
}

// A free-form filter query never claims local completeness under
// local-or(remote); the remote layer is always consulted.
#[tokio::test]
async fn local_or_free_form_query_always_consults_remote() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![
        Post::new(rid(1), "alpha", 10),
        Post::new(rid(3), "gamma", 8),
    ]);
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![Post::new(rid(1), "alpha", 10)]).await;

    let result = manager
        .search(
            Query::all().filter(|f| f.gte("stars", 5)).sort_asc("title"),
            &ReadContext::local_or_remote(),
        )
        .result()
        .await
        .unwrap();

    assert_eq!(remote.search_count(), 1);
    assert!(remote.searches()[0].filter.is_some());
    assert_eq!(result.count(), 2);
}

// local-then(remote) search: the continuous stream observes the local value
// first and the remote value second; `once` resolves with the remote value.
#[tokio::test(start_paused = true)]
async fn local_then_remote_emits_local_first() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![
        Post::new(rid(1), "alpha", 10),
        Post::new(rid(2), "beta", 3),
    ]);
    let (manager, _memory) = blended_manager(remote.clone());

    let mut response = manager.search(
        Query::many(vec![rid(1), rid(2)]),
        &ReadContext::local_then_remote(),
    );

    let first = response.continuous.next().await.unwrap().unwrap();
    assert!(first.is_empty());

    let second = response.continuous.next().await.unwrap().unwrap();
    assert_eq!(second.count(), 2);
    assert!(second.is_data_remote());

    let authoritative = response.once.result().await.unwrap();
    assert!(authoritative.same_payload(&second));
}

// A remote payload byte-identical to the local one produces no second
// continuous emission.
#[tokio::test(start_paused = true)]
async fn local_then_identical_remote_emits_once() {
    let post = Post::new(rid(1), "alpha", 10);
    let remote = RemoteStub::new();
    remote.respond_with(vec![post.clone()]);
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![post.clone()]).await;

    let mut response = manager.search(
        Query::one(rid(1)),
        &ReadContext::local_then_remote(),
    );

    let first = response.continuous.next().await.unwrap().unwrap();
    assert_eq!(first.entity(), Some(&post));

    let quiet = timeout(QUIET, response.continuous.next()).await;
    assert!(quiet.is_err(), "identical remote payload must not re-emit");
}

// persist(retain_extra_local_data): an extra the remote payload never asked
// for survives in the memory store.
#[tokio::test]
async fn persisting_remote_read_retains_local_extras() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![Post::new(rid(1), "alpha", 12)]);
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![Post::new(rid(1), "alpha", 10).with_body("kept")]).await;

    let result = manager
        .search(Query::one(rid(1)), &ReadContext::remote())
        .result()
        .await
        .unwrap();

    let held = memory
        .get(&rid(1), &ReadContext::local())
        .await
        .unwrap()
        .value
        .unwrap();
    assert_eq!(held.stars, 12);
    assert_eq!(held.body, Lazy::Requested("kept".into()));
    assert_eq!(result.entity().unwrap().body, Lazy::Requested("kept".into()));
}

#[tokio::test]
async fn persisting_remote_read_can_discard_local_extras() {
    let remote = RemoteStub::new();
    remote.respond_with(vec![Post::new(rid(1), "alpha", 12)]);
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![Post::new(rid(1), "alpha", 10).with_body("old")]).await;

    manager
        .search(
            Query::one(rid(1)),
            &ReadContext::remote().persisting(ExtraLocalData::Discard),
        )
        .result()
        .await
        .unwrap();

    let held = memory
        .get(&rid(1), &ReadContext::local())
        .await
        .unwrap()
        .value
        .unwrap();
    assert_eq!(held.body, Lazy::Unrequested);
}

#[tokio::test]
async fn remote_failure_downgrades_to_local_when_allowed() {
    let remote = RemoteStub::new();
    remote.fail_with(Error::network("gateway timeout"));
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![Post::new(rid(1), "alpha", 10)]).await;

    let result = manager
        .search(Query::one(rid(1)), &ReadContext::remote_or_local())
        .result()
        .await
        .unwrap();

    assert_eq!(result.count(), 1);
    assert!(!result.is_data_remote());
}

#[tokio::test]
async fn remote_failure_surfaces_without_or_local() {
    let remote = RemoteStub::new();
    remote.fail_with(Error::network("gateway timeout"));
    let (manager, memory) = blended_manager(remote.clone());
    seed(&memory, vec![Post::new(rid(1), "alpha", 10)]).await;

    let err = manager
        .search(Query::one(rid(1)), &ReadContext::remote())
        .result()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn invalid_regex_fails_the_stream() {
    let (manager, _memory) = local_manager::<Post>();

    let err = manager
        .search(
            Query::all().filter(|f| f.matches("title", "(")),
            &ReadContext::local(),
        )
        .result()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidQuery(_)));
}

// Continuous subscribers observe committed mutations in order, and only
// when the evaluated result actually changes.
#[tokio::test(start_paused = true)]
async fn continuous_search_tracks_mutations_in_commit_order() {
    let (manager, _memory) = local_manager::<Post>();

    let mut response = manager.search(
        Query::all().filter(|f| f.gte("stars", 5)).sort_asc("title"),
        &ReadContext::local(),
    );

    let initial = response.continuous.next().await.unwrap().unwrap();
    assert!(initial.is_empty());

    let alpha = Post::new(rid(1), "alpha", 10);
    manager
        .set(vec![alpha.clone()], &WriteContext::local())
        .await
        .unwrap();
    let after_insert = response.continuous.next().await.unwrap().unwrap();
    assert_eq!(after_insert.entities(), vec![&alpha]);

    // A mutation that does not change the evaluated result must not emit.
    manager
        .set(vec![Post::new(rid(2), "beta", 1)], &WriteContext::local())
        .await
        .unwrap();
    manager
        .set(vec![alpha.clone()], &WriteContext::local())
        .await
        .unwrap();
    let quiet = timeout(QUIET, response.continuous.next()).await;
    assert!(quiet.is_err(), "unchanged result must not re-emit");

    manager
        .remove(&[rid(1)], &WriteContext::local())
        .await
        .unwrap();
    let after_remove = response.continuous.next().await.unwrap().unwrap();
    assert!(after_remove.is_empty());
}

// Writing through the remote store fuses server-assigned identifiers into
// the local index: lookups by either component resolve afterwards.
#[tokio::test]
async fn set_through_remote_fuses_identifiers() {
    let remote = RemoteStub::new();
    let (manager, memory) = blended_manager(remote.clone());

    let local = LocalId::generate();
    let draft = Post::new(Identifier::local(local), "draft", 0);
    let stored = manager
        .set(vec![draft], &WriteContext::local_and_remote())
        .await
        .unwrap();

    let assigned = stored[0].identifier();
    assert!(assigned.is_remote());
    assert_eq!(assigned.local_id(), Some(local));

    let by_local = memory
        .get(&Identifier::local(local), &ReadContext::local())
        .await
        .unwrap()
        .value;
    let by_remote = memory
        .get(
            &Identifier::remote(assigned.remote_id().unwrap()),
            &ReadContext::local(),
        )
        .await
        .unwrap()
        .value;
    assert_eq!(by_local, by_remote);
    assert!(by_local.is_some());
}

#[tokio::test]
async fn remove_all_deletes_matching_entities() {
    let (manager, _memory) = local_manager::<Post>();
    manager
        .set(
            vec![
                Post::new(rid(1), "alpha", 10),
                Post::new(rid(2), "beta", 3),
                Post::new(rid(3), "gamma", 8),
            ],
            &WriteContext::local(),
        )
        .await
        .unwrap();

    let removed = manager
        .remove_all(
            Query::all().filter(|f| f.gte("stars", 5)),
            &WriteContext::local(),
        )
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);

    let remaining = manager
        .search(Query::all(), &ReadContext::local())
        .result()
        .await
        .unwrap();
    assert_eq!(remaining.count(), 1);
    assert_eq!(remaining.entity().unwrap().title, "beta");
}

#[tokio::test]
async fn local_writes_do_not_touch_the_remote_store() {
    let remote = RemoteStub::new();
    let (manager, _memory) = blended_manager(remote.clone());

    manager
        .set(vec![Post::new(rid(1), "alpha", 1)], &WriteContext::local())
        .await
        .unwrap();
    manager
        .remove(&[rid(1)], &WriteContext::local())
        .await
        .unwrap();

    assert_eq!(remote.set_count(), 0);
}
