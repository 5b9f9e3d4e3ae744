mod common;

use common::{memory_session, page, sessions, text};
use keepsake::prelude::*;
use keepsake::{Proxy, Storage};

#[test]
fn every_lookup_path_yields_the_same_instance() {
    for (backend, session) in sessions() {
        let page = page(&session, "Home", &["first"]);
        session.store(&page).unwrap();
        let comment = page
            .collection(&session, "comments")
            .unwrap()
            .get(&session, 0)
            .unwrap()
            .unwrap();

        let by_id = session.load("Page", page.id().as_str()).unwrap();
        let by_field = session.load_by("Page", "title", "Home").unwrap();
        let by_proxy = session.proxy("Page", page.id().as_str()).unwrap();
        let by_search = session
            .search("Page", &Criteria::new().eq("title", "Home"), &[])
            .unwrap();
        assert!(by_id.ptr_eq(&page), "{backend}");
        assert!(by_field.ptr_eq(&page), "{backend}");
        assert!(by_proxy.ptr_eq(&page), "{backend}");
        assert!(by_search[0].ptr_eq(&page), "{backend}");

        let owner = session.owner(&comment).unwrap().unwrap();
        assert!(owner.ptr_eq(&page), "{backend}");
        let comment_again = session.load("Comment", comment.id().as_str()).unwrap();
        assert!(comment_again.ptr_eq(&comment), "{backend}");
    }
}

#[test]
fn proxy_for_cached_real_object_is_that_object() {
    for (backend, session) in sessions() {
        session
            .storage()
            .insert(
                "page",
                &["id", "created_at", "title", "hits"].map(String::from),
                &[
                    Value::from("42"),
                    Value::TimestampTz(0),
                    Value::from("Answer"),
                    Value::BigInt(0),
                ],
            )
            .unwrap();

        let real = session.load("Page", "42").unwrap();
        assert!(!real.is_proxy(), "{backend}");
        let proxy = Proxy::create(&session, "Page", "42").unwrap();
        assert!(proxy.ptr_eq(&real), "{backend}");

        let first = session.cache().store(&real).unwrap();
        let second = session.cache().store(&proxy).unwrap();
        assert!(first.ptr_eq(&real) && second.ptr_eq(&real), "{backend}");

        let cached = session.cache().get(real.id()).unwrap();
        assert!(cached.ptr_eq(&real), "{backend}");
        assert!(!cached.is_proxy(), "{backend}");
    }
}

#[test]
fn proxy_creation_touches_no_storage() {
    let (session, storage) = memory_session();
    let before = storage.stats();
    let proxy = session.proxy("Page", "not-yet-looked-up").unwrap();
    assert!(proxy.is_proxy());
    assert_eq!(proxy.class_name(), "Page");
    assert_eq!(storage.stats(), before);
}

#[test]
fn proxy_loads_in_place_on_first_access() {
    for (backend, session) in sessions() {
        let id = {
            let page = page(&session, "Home", &[]);
            session.store(&page).unwrap();
            page.id().clone()
        };
        session.cache().compact();

        let proxy = session.proxy("Page", id.as_str()).unwrap();
        let holder = proxy.clone();
        assert!(holder.is_proxy(), "{backend}");
        assert_eq!(text(&session, &proxy, "title"), Value::from("Home"), "{backend}");
        assert!(!holder.is_proxy(), "{backend}");
        assert!(holder.ptr_eq(&proxy), "{backend}");
    }
}

#[test]
fn proxy_of_subclass_row_takes_stored_class() {
    for (backend, session) in sessions() {
        let id = {
            let feature = session
                .create_with("FeaturePage", [("title", "Launch"), ("banner", "New!")])
                .unwrap();
            session.store(&feature).unwrap();
            feature.id().clone()
        };
        session.cache().compact();

        let proxy = session.proxy("Page", id.as_str()).unwrap();
        assert_eq!(text(&session, &proxy, "banner"), Value::from("New!"), "{backend}");
        assert_eq!(proxy.class_name(), "FeaturePage", "{backend}");
    }
}

#[test]
fn undefined_field_fails_the_same_way_through_a_proxy() {
    for (backend, session) in sessions() {
        let id = {
            let page = page(&session, "Home", &[]);
            session.store(&page).unwrap();
            page.id().clone()
        };
        session.cache().compact();

        let proxy = session.proxy("Page", id.as_str()).unwrap();
        let through_proxy = proxy.get(&session, "colour").unwrap_err();
        let on_real = proxy.get(&session, "colour").unwrap_err();
        assert!(matches!(through_proxy, Error::Method(_)), "{backend}");
        assert_eq!(through_proxy.to_string(), on_real.to_string(), "{backend}");
        assert_eq!(
            on_real.to_string(),
            "Can't locate object method \"colour\" via class \"Page\"",
            "{backend}"
        );
    }
}

#[test]
fn proxy_for_missing_row_fails_on_access() {
    for (backend, session) in sessions() {
        let proxy = session.proxy("Page", "ghost").unwrap();
        let err = proxy.get(&session, "title").unwrap_err();
        assert!(matches!(err, Error::Proxy(_)), "{backend}");
        assert!(err.is_not_found(), "{backend}");
        assert!(proxy.is_proxy(), "{backend}");
    }
}

#[test]
fn storing_a_proxy_is_a_no_op() {
    let (session, storage) = memory_session();
    let page = page(&session, "Home", &[]);
    session.store(&page).unwrap();
    Proxy::promote(&page).unwrap();
    assert!(page.is_proxy());

    let before = storage.stats();
    session.store(&page).unwrap();
    assert_eq!(storage.stats(), before);

    // promoting twice is fine
    Proxy::promote(&page).unwrap();
    assert!(page.is_proxy());
}

#[test]
fn promotion_requires_a_stored_object() {
    let (session, _) = memory_session();
    let page = page(&session, "Draft", &[]);
    assert!(matches!(Proxy::promote(&page), Err(Error::InvalidParameters(_))));
    assert!(!page.is_proxy());
}

#[test]
fn dropped_objects_leave_the_cache() {
    let (session, _) = memory_session();
    let id = {
        let page = page(&session, "Temp", &["a", "b"]);
        session.store(&page).unwrap();
        page.id().clone()
    };
    assert!(session.cache().get(&id).is_none());
    assert_eq!(session.cache().all().count(), 0);
    assert!(session.cache().compact() > 0);
}

#[test]
fn proxy_all_releases_stored_objects() {
    let (session, _) = memory_session();
    let page = page(&session, "Home", &[]);
    session.store(&page).unwrap();
    let draft = session.create_with("Page", [("title", "Draft")]).unwrap();

    assert!(session.cache().proxy_all() >= 1);
    assert!(page.is_proxy());
    assert!(!draft.is_proxy());
    assert_eq!(text(&session, &page, "title"), Value::from("Home"));
}

#[test]
fn json_snapshot_lists_relationships_by_id() {
    let (session, _) = memory_session();
    let page = page(&session, "Home", &["first"]);
    let json = page.to_json(&session).unwrap();
    assert_eq!(json["class"], "Page");
    assert_eq!(json["title"], "Home");
    assert_eq!(json["hits"], 0);
    assert_eq!(json["comments"].as_array().map(Vec::len), Some(1));
    assert!(json["body"].is_string());
    assert!(json["author"].is_null());
}
