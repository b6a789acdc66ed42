//! Per-entity convenience operations.

use crate::context::Context;
use crate::dui::{self, DuiChange, DuiSummary};
use crate::error::CoreResult;
use crate::predicate::{FetchRequest, Predicate};
use crate::query::{self, FindResult};
use crate::record::Record;
use crate::session::Session;
use crate::types::ObjectId;
use stackdb_codec::RecordDictionary;

/// Operations on one entity, with the context passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    name: String,
}

impl Entity {
    /// The entity called `name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A request for every record of the entity.
    #[must_use]
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest::new(self.name.clone())
    }

    /// Creates a blank record in `session`.
    ///
    /// # Errors
    ///
    /// See [`Session::insert`].
    pub fn insert(&self, session: &Session) -> CoreResult<Record> {
        session.insert(&self.name)
    }

    /// Inserts a record built from `dict` and saves `context`, returning the
    /// new record's identity.
    ///
    /// Blocks until the context has run the work. Nothing is left pending in
    /// the context if validation or the save fails.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ValidationFailed`](crate::CoreError::ValidationFailed),
    /// a save error or a submission error.
    pub fn insert_object_with_dictionary(&self, context: &Context, dict: RecordDictionary) -> CoreResult<ObjectId> {
        let name = self.name.clone();
        context.perform_and_wait(move |session| {
            let record = session.insert_with_dictionary(&name, &dict)?;
            if let Err(e) = session.save() {
                session.delete(&record)?;
                return Err(e);
            }
            Ok(record.id())
        })
    }

    /// Deletes every record of the entity and saves `context`, returning how
    /// many were deleted.
    ///
    /// # Errors
    ///
    /// Returns a fetch, save or submission error. On a failed save the
    /// deletes are rolled back.
    pub fn delete_all_objects(&self, context: &Context) -> CoreResult<usize> {
        let request = self.fetch_request();
        context.perform_and_wait(move |session| {
            let records = session.fetch(&request)?;
            for record in &records {
                session.delete(record)?;
            }
            if let Err(e) = session.save() {
                session.rollback()?;
                return Err(e);
            }
            tracing::debug!(context = %session.context_id(), entity = %request.entity, deleted = records.len(), "deleted all");
            Ok(records.len())
        })
    }

    /// Counts matching records on `context`; see [`query::count`].
    ///
    /// # Errors
    ///
    /// Returns a submission error.
    pub fn count<F>(&self, context: &Context, predicate: Predicate, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<usize>) + Send + 'static,
    {
        query::count(context, self.name.clone(), predicate, callback)
    }

    /// Finds matching records on `context`; see [`query::find`].
    ///
    /// # Errors
    ///
    /// Returns a submission error.
    pub fn find<F>(&self, context: &Context, predicate: Predicate, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<FindResult>) + Send + 'static,
    {
        query::find(context, self.fetch_request().predicate(predicate), callback)
    }

    /// Reconciles `objects` with the records matching `predicate`; see
    /// [`dui::dui`].
    ///
    /// # Errors
    ///
    /// See [`dui::dui`].
    pub fn dui<F>(
        &self,
        session: &Session,
        predicate: &Predicate,
        objects: &[RecordDictionary],
        pkey: &str,
        handler: F,
    ) -> CoreResult<DuiSummary>
    where
        F: FnMut(DuiChange<'_>) -> CoreResult<()>,
    {
        dui::dui(session, &self.name, predicate, objects, pkey, handler)
    }

    /// Makes the records matching `predicate` mirror `objects` and saves
    /// `context`.
    ///
    /// # Errors
    ///
    /// See [`dui::dui`]; a failed save rolls the session back.
    pub fn sync_objects(
        &self,
        context: &Context,
        predicate: Predicate,
        objects: Vec<RecordDictionary>,
        pkey: impl Into<String>,
    ) -> CoreResult<DuiSummary> {
        let name = self.name.clone();
        let pkey = pkey.into();
        context.perform_and_wait(move |session| {
            let outcome = dui::dui(
                session,
                &name,
                &predicate,
                &objects,
                &pkey,
                dui::mirror_handler(session, &name),
            )
            .and_then(|summary| session.save().map(|()| summary));
            if outcome.is_err() {
                session.rollback()?;
            }
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::schema::Schema;
    use crate::stack::Stack;
    use stackdb_codec::Value;

    fn stack() -> Stack {
        Stack::in_memory(
            Schema::from_json_str(
                r#"{"entities":[{"name":"Tag","attributes":[
                    {"name":"slug","type":"text"},
                    {"name":"uses","type":"integer","optional":true}]}]}"#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    fn tag(slug: &str) -> RecordDictionary {
        RecordDictionary::new().with("slug", slug)
    }

    #[test]
    fn insert_and_delete_all() {
        let stack = stack();
        let ctx = stack.background_context().unwrap();
        let tags = Entity::named("Tag");

        let id = tags.insert_object_with_dictionary(&ctx, tag("rust")).unwrap();
        tags.insert_object_with_dictionary(&ctx, tag("db")).unwrap();
        assert!(stack.coordinator().unwrap().lookup(&id).is_some());

        assert_eq!(tags.delete_all_objects(&ctx).unwrap(), 2);
        assert_eq!(stack.coordinator().unwrap().record_count(), 0);
    }

    #[test]
    fn failed_insert_leaves_nothing_pending() {
        let stack = stack();
        let ctx = stack.background_context().unwrap();
        let tags = Entity::named("Tag");

        let err = tags
            .insert_object_with_dictionary(&ctx, RecordDictionary::new().with("uses", 1))
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));
        assert!(!ctx.perform_and_wait(|s| Ok(s.has_changes())).unwrap());
    }

    #[test]
    fn sandbox_insert_is_rejected_and_discarded() {
        let stack = stack();
        let sandbox = stack.sandbox_context().unwrap();
        let err = Entity::named("Tag")
            .insert_object_with_dictionary(&sandbox, tag("x"))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(!sandbox.perform_and_wait(|s| Ok(s.has_changes())).unwrap());
        assert_eq!(stack.coordinator().unwrap().record_count(), 0);
    }

    #[test]
    fn sync_objects_mirrors_the_batch() {
        let stack = stack();
        let ctx = stack.background_context().unwrap();
        let tags = Entity::named("Tag");
        tags.insert_object_with_dictionary(&ctx, tag("old")).unwrap();
        tags.insert_object_with_dictionary(&ctx, tag("keep")).unwrap();

        let summary = tags
            .sync_objects(
                &ctx,
                Predicate::All,
                vec![tag("keep").with("uses", 3), tag("new")],
                "slug",
            )
            .unwrap();
        assert_eq!((summary.inserted, summary.updated, summary.deleted), (1, 1, 1));

        let uses = stack
            .coordinator()
            .unwrap()
            .fetch_dictionaries(&tags.fetch_request().predicate(Predicate::eq("slug", "keep")))
            .unwrap();
        assert_eq!(uses[0].1.get("uses"), Some(&Value::Integer(3)));
    }
}
