mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_changes::CollectionChange;
use tessera_engine::{
    AddEntity, EngineError, LinkEntities, Origin, RemoveEntity, UnlinkEntities, command,
};
use tessera_model::{CollectionDef, Entity, ModelError};

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    (Arc::clone(&count), count)
}

#[tokio::test]
async fn test_collection_event_groups_changes() {
    let engine = start_engine();
    let kept = Entity::new();
    let gone = Entity::new();
    engine
        .execute(command("seed", move |snapshot, _| {
            let mut books = snapshot.collection_mut(BOOKS)?;
            books.add_with_id(kept, named("kept"))?;
            books.add_with_id(gone, named("gone"))
        }))
        .await
        .unwrap();

    let events = Recorder::new();
    let sink = events.clone();
    let _subscription = engine
        .subscriptions()
        .on_collection(BOOKS, move |event| sink.push(event.clone()))
        .unwrap();

    let receipt = engine
        .execute(command("mixed", move |snapshot, _| {
            let mut books = snapshot.collection_mut(BOOKS)?;
            books.add(named("new"))?;
            books.replace(kept, named("renamed"))?;
            books.remove(gone)?;
            Ok(())
        }))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();

    let events = events.take();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(Some(event.change_id), receipt.change_id);
    assert_eq!(event.origin, Origin::Command);
    assert_eq!(event.len(), 3);
    assert_eq!(event.added.len(), 1);
    assert_eq!(event.added[0].1, named("new"));
    assert_eq!(event.modified, vec![(kept, named("kept"), named("renamed"))]);
    assert_eq!(event.removed, vec![(gone, named("gone"))]);
    let printed = format!("{event:?}");
    assert!(printed.starts_with("CollectionEvent"), "{printed}");
    assert!(printed.contains("renamed"), "{printed}");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_untouched_collection_is_not_notified() {
    let engine = start_engine();
    let (authors, count) = counter();
    let _subscription = engine
        .subscriptions()
        .on_collection(AUTHORS, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    engine
        .execute(AddEntity::of(BOOKS, Entity::new(), named("Dune")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();
    assert_eq!(authors.load(Ordering::SeqCst), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_entity_binding_ends_after_removal() {
    let engine = start_engine();
    let book = Entity::new();
    engine
        .execute(AddEntity::of(BOOKS, book, named("Dune")))
        .await
        .unwrap();

    let changes = Recorder::new();
    let sink = changes.clone();
    let subscription = engine
        .subscriptions()
        .on_entity(BOOKS, book, move |entity, change| {
            sink.push((entity, change.clone()));
        })
        .unwrap();
    assert!(subscription.is_active());

    // Other entities do not reach the binding.
    engine
        .execute(AddEntity::of(BOOKS, Entity::new(), named("Emma")))
        .await
        .unwrap();
    engine
        .execute(RemoveEntity::of(BOOKS, book))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();

    assert_eq!(
        changes.take(),
        vec![(book, CollectionChange::Removed { old: named("Dune") })]
    );
    assert!(!subscription.is_active());
    assert!(engine.subscriptions().is_empty());

    // Re-adding the same id does not revive the binding.
    engine
        .execute(AddEntity::of(BOOKS, book, named("Dune again")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();
    assert_eq!(changes.len(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_dispose_removes_only_that_subscription() {
    let engine = start_engine();
    let (first, first_count) = counter();
    let (second, second_count) = counter();
    let one = engine
        .subscriptions()
        .on_collection(BOOKS, move |_| {
            first_count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let _two = engine
        .subscriptions()
        .on_collection(BOOKS, move |_| {
            second_count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(engine.subscriptions().len(), 2);

    one.dispose();
    assert_eq!(engine.subscriptions().len(), 1);

    engine
        .execute(AddEntity::of(BOOKS, Entity::new(), named("Dune")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_dropping_handle_unsubscribes_and_detach_keeps() {
    let engine = start_engine();
    let (count, sink) = counter();
    {
        let _scoped = engine.subscriptions().on_model(|_| {});
        assert_eq!(engine.subscriptions().len(), 1);
    }
    assert!(engine.subscriptions().is_empty());

    engine
        .subscriptions()
        .on_model(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .detach();
    engine
        .execute(AddEntity::of(BOOKS, Entity::new(), named("Dune")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(engine.subscriptions().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_frame_subscriber_sees_only_its_shard() {
    let engine = start_engine();
    let library = Recorder::new();
    let sink = library.clone();
    let _library = engine
        .subscriptions()
        .on_frame::<Library, _>(move |publication, frame| {
            sink.push((publication.change_id, frame.shard_name()));
        });
    let (catalog, count) = counter();
    let _catalog = engine.subscriptions().on_frame::<Catalog, _>(move |_, _| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let receipt = engine
        .execute(AddEntity::of(BOOKS, Entity::new(), named("Dune")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();

    assert_eq!(
        library.take(),
        vec![(receipt.change_id.unwrap(), "library")]
    );
    assert_eq!(catalog.load(Ordering::SeqCst), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_relation_subscriber() {
    let engine = start_engine();
    let author = Entity::new();
    let book = Entity::new();
    let events = Recorder::new();
    let sink = events.clone();
    let _subscription = engine
        .subscriptions()
        .on_relation(WROTE, move |event| {
            let event = event.clone();
            assert!(format!("{event:?}").starts_with("RelationEvent"));
            sink.push((event.linked, event.unlinked));
        })
        .unwrap();

    engine
        .execute(LinkEntities::of(WROTE, author, book))
        .await
        .unwrap();
    engine
        .execute(UnlinkEntities::of(WROTE, author, book))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();

    assert_eq!(
        events.take(),
        vec![
            (vec![(author, book)], vec![]),
            (vec![], vec![(author, book)]),
        ]
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_stop_delivery() {
    let engine = start_engine();
    let _bad = engine.subscriptions().on_model(|_| panic!("subscriber bug"));
    let (count, sink) = counter();
    let _good = engine.subscriptions().on_model(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..3 {
        engine
            .execute(AddEntity::of(BOOKS, Entity::new(), named(&i.to_string())))
            .await
            .unwrap();
    }
    engine.flush_notifications().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_callback_may_subscribe_and_submit() {
    let engine = start_engine();
    let nested = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (follow_ups, sink) = counter();

    let inner_engine = engine.clone();
    let store = Arc::clone(&nested);
    let _subscription = engine
        .subscriptions()
        .on_collection(AUTHORS, move |event| {
            // Register from inside a callback, then queue a follow-up command.
            let sink = Arc::clone(&sink);
            store.lock().push(inner_engine.subscriptions().on_model(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }));
            for (author, _) in &event.added {
                let _ = inner_engine.try_submit(AddEntity::of(
                    BOOKS,
                    Entity::new(),
                    named(&format!("by {author}")),
                ));
            }
        })
        .unwrap();

    engine
        .execute(AddEntity::of(AUTHORS, Entity::new(), named("Herbert")))
        .await
        .unwrap();
    engine.flush_notifications().await.unwrap();
    // The follow-up was queued during delivery; wait for its publication.
    engine.execute(command("sync", |_, _| Ok(()))).await.unwrap();
    engine.flush_notifications().await.unwrap();

    assert_eq!(engine.model().collection(BOOKS).unwrap().len(), 1);
    assert_eq!(follow_ups.load(Ordering::SeqCst), 1);
    assert_eq!(nested.lock().len(), 1);

    engine.shutdown().await;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Isbn(String);

#[tokio::test]
async fn test_conflicting_types_are_rejected() {
    let engine = start_engine();
    let _books = engine.subscriptions().on_collection(BOOKS, |_| {}).unwrap();

    let wrong: CollectionDef<Library, Book, Isbn> = CollectionDef::new("books");
    let result = engine.subscriptions().on_collection(wrong, |_| {});
    assert!(matches!(
        result,
        Err(EngineError::Model(ModelError::TypeMismatch { .. }))
    ));
    assert_eq!(engine.subscriptions().len(), 1);

    engine.shutdown().await;
}
