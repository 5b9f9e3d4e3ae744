#![allow(dead_code)]

use keepsake::prelude::*;
use keepsake::MemoryStorage;
use std::sync::Arc;

/// Page owns a body, comments and an optional summary. Its author, readers
/// and editor are weak references.
pub fn builder() -> SessionBuilder {
    SessionBuilder::new()
        .class(ClassDef::new("Author").field(FieldInfo::new("name", SqlType::Text)))
        .unwrap()
        .class(
            ClassDef::new("Page")
                .field(FieldInfo::new("title", SqlType::Text).unique(true))
                .field(FieldInfo::new("hits", SqlType::BigInt).default(0_i64))
                .has_one("body", "Body")
                .has_many("comments", "Comment")
                .might_have("summary", "Summary")
                .weak_has_one("author", "Author")
                .weak_has_many("readers", "Author")
                .weak_might_have("editor", "Author"),
        )
        .unwrap()
        .class(
            ClassDef::new("FeaturePage")
                .extends("Page")
                .field(FieldInfo::new("banner", SqlType::Text).nullable(true)),
        )
        .unwrap()
        .class(ClassDef::new("Body").field(FieldInfo::new("text", SqlType::Text)))
        .unwrap()
        .class(ClassDef::new("Comment").field(FieldInfo::new("text", SqlType::Text)))
        .unwrap()
        .class(ClassDef::new("Summary").field(FieldInfo::new("text", SqlType::Text)))
        .unwrap()
}

pub fn memory_session() -> (Session, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let session = builder().build_with(storage.clone()).unwrap();
    (session, storage)
}

pub fn sqlite_session() -> Session {
    builder().build_sqlite(&SqliteConfig::memory()).unwrap()
}

/// The same schema over every backend.
pub fn sessions() -> Vec<(&'static str, Session)> {
    vec![("memory", memory_session().0), ("sqlite", sqlite_session())]
}

/// A page with a body and the given comments, not yet stored.
pub fn page(session: &Session, title: &str, comments: &[&str]) -> Object {
    let page = session.create_with("Page", [("title", title)]).unwrap();
    let body = session.create_with("Body", [("text", "body text")]).unwrap();
    page.set_related(session, "body", Some(&body)).unwrap();
    let list = page.collection(session, "comments").unwrap();
    for text in comments {
        let comment = session.create_with("Comment", [("text", *text)]).unwrap();
        list.push(session, &comment).unwrap();
    }
    page
}

pub fn text(session: &Session, object: &Object, field: &str) -> Value {
    object.get(session, field).unwrap()
}

pub fn comment_texts(session: &Session, page: &Object) -> Vec<Value> {
    page.collection(session, "comments")
        .unwrap()
        .elements(session)
        .unwrap()
        .iter()
        .map(|c| c.get(session, "text").unwrap())
        .collect()
}
