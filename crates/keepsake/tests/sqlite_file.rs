mod common;

use common::{builder, comment_texts, page, text};
use keepsake::prelude::*;

#[test]
fn objects_survive_reopening_the_database() {
    let path = std::env::temp_dir().join(format!("keepsake_reopen_{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let config = SqliteConfig::file(path.to_string_lossy().to_string());

    let id = {
        let session = builder().build_sqlite(&config).unwrap();
        let page = page(&session, "Home", &["one", "two"]);
        let summary = session.create_with("Summary", [("text", "short")]).unwrap();
        page.set_related(&session, "summary", Some(&summary)).unwrap();
        session.store(&page).unwrap();
        page.id().clone()
    };

    let session = builder().build_sqlite(&config).unwrap();
    let page = session.load("Page", id.as_str()).unwrap();
    assert_eq!(text(&session, &page, "title"), Value::from("Home"));
    assert_eq!(
        comment_texts(&session, &page),
        vec![Value::from("one"), Value::from("two")]
    );
    let body = page.related(&session, "body").unwrap().unwrap();
    assert!(body.is_proxy());
    assert_eq!(text(&session, &body, "text"), Value::from("body text"));
    let summary = page.related(&session, "summary").unwrap().unwrap();
    assert_eq!(text(&session, &summary, "text"), Value::from("short"));

    session.delete(&page).unwrap();
    assert!(session.load("Page", id.as_str()).is_ok_and(|p| !p.from_storage(&session).unwrap()));
    drop(page);
    drop(body);
    drop(summary);
    session.cache().compact();
    assert!(session.load("Page", id.as_str()).unwrap_err().is_not_found());

    drop(session);
    let _ = std::fs::remove_file(&path);
}
