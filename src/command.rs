use crate::query::parser::is_truthy;
use crate::request::FindAndModifyRequest;
use crate::util::random_id::IdGenerator;
use bson::{doc, Bson, Document};

/// The options of the native command. Members absent from the request stay absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeOptions {
    pub new: Option<bool>,
    pub remove: Option<bool>,
    pub upsert: Option<bool>,
    pub fields: Option<Document>,
    /// The write concern.
    pub w: Option<Bson>,
    pub max_time_ms: Option<i64>,
    pub wtimeout: Option<i64>,
    /// Fixed to `1` whenever the request asks for an explain.
    pub explain: Option<i32>,
    pub bypass_document_validation: Option<bool>,
}

/// The store's atomic find-and-modify command.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCommand {
    pub query: Document,
    pub sort: Document,
    pub update: Option<Document>,
    pub options: NativeOptions,
}

impl NativeCommand {
    /// Translates a validated request. When the request upserts, the update is given a
    /// generated `$setOnInsert._id` unless it already holds one, so that the id of an
    /// inserted document is known to the caller.
    pub fn from_request(request: &FindAndModifyRequest, id_generator: &dyn IdGenerator) -> Self {
        let options = NativeOptions {
            new: request.return_new,
            remove: request.remove,
            upsert: request.upsert,
            fields: request.fields.clone(),
            w: request.write_concern.clone(),
            max_time_ms: request.max_time_ms,
            wtimeout: request.wtimeout,
            explain: request.explain.as_ref().map(|_| 1),
            bypass_document_validation: request.bypass_document_validation,
        };

        let mut command = NativeCommand {
            query: request.query.clone().unwrap_or_default(),
            sort: request.sort.clone().unwrap_or_default(),
            update: request.update.clone().filter(|u| !u.is_empty()),
            options,
        };

        if command.is_upsert() {
            command.ensure_upsert_id(id_generator);
        }
        command
    }

    pub fn is_upsert(&self) -> bool {
        self.options.upsert.unwrap_or(false)
    }

    pub fn is_remove(&self) -> bool {
        self.options.remove.unwrap_or(false)
    }

    pub fn is_return_new(&self) -> bool {
        self.options.new.unwrap_or(false)
    }

    /// The id the command inserts with if the upsert inserts, when it is known up front.
    pub fn upsert_id(&self) -> Option<&Bson> {
        self.update
            .as_ref()?
            .get_document("$setOnInsert")
            .ok()?
            .get("_id")
    }

    fn ensure_upsert_id(&mut self, id_generator: &dyn IdGenerator) {
        let update = self.update.get_or_insert_with(Document::new);

        if !matches!(update.get("$setOnInsert"), Some(Bson::Document(_))) {
            update.insert("$setOnInsert", Document::new());
        }
        if let Ok(set_on_insert) = update.get_document_mut("$setOnInsert") {
            if set_on_insert.get("_id").map_or(true, is_falsy_id) {
                set_on_insert.insert("_id", id_generator.generate());
            }
        }
    }

    /// The command as sent to the store.
    pub fn to_document(&self, collection: &str) -> Document {
        let mut command = doc! {
            "findAndModify": collection,
            "query": self.query.clone(),
            "sort": self.sort.clone(),
        };
        if let Some(update) = &self.update {
            command.insert("update", update.clone());
        }

        let options = &self.options;
        if let Some(new) = options.new {
            command.insert("new", new);
        }
        if let Some(remove) = options.remove {
            command.insert("remove", remove);
        }
        if let Some(upsert) = options.upsert {
            command.insert("upsert", upsert);
        }
        if let Some(fields) = &options.fields {
            command.insert("fields", fields.clone());
        }
        if let Some(w) = &options.w {
            command.insert("writeConcern", doc! { "w": w.clone() });
        }
        if let Some(max_time_ms) = options.max_time_ms {
            command.insert("maxTimeMS", max_time_ms);
        }
        if let Some(wtimeout) = options.wtimeout {
            command.insert("wtimeout", wtimeout);
        }
        if let Some(explain) = options.explain {
            command.insert("explain", explain);
        }
        if let Some(bypass) = options.bypass_document_validation {
            command.insert("bypassDocumentValidation", bypass);
        }
        command
    }
}

/// An `_id` the caller left empty, blank, zero or false is replaced by a generated one.
fn is_falsy_id(id: &Bson) -> bool {
    match id {
        Bson::String(s) => s.is_empty(),
        other => !is_truthy(other),
    }
}
