use crate::util::random_id::DEFAULT_ID_LENGTH;

#[derive(Debug, Clone, Default)]
pub struct Options {
    executor_options: Option<ExecutorOptions>,
}

impl Options {

    pub fn with_executor_options(mut self, executor_options: ExecutorOptions) -> Self {
        self.executor_options = Some(executor_options);
        self
    }

    pub fn executor_options(&self) -> &ExecutorOptions {
        static DEFAULT_EXECUTOR_OPTIONS: ExecutorOptions = ExecutorOptions {
            mode: None,
            id_length: None,
            sorted_upsert_placeholder: None,
        };
        self.executor_options.as_ref().unwrap_or(&DEFAULT_EXECUTOR_OPTIONS)
    }
}

/// Which executor serves find-and-modify calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Trusted process with access to the store's native command.
    Authoritative,
    /// Untrusted replica predicting the outcome with primitive operations.
    Optimistic,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    mode: Option<ExecutorKind>,

    /// Length of the identifiers generated for upserted documents.
    id_length: Option<usize>,

    /// Return an empty document, rather than nothing, from a sorted upsert that inserted
    /// without asking for the new document.
    sorted_upsert_placeholder: Option<bool>,
}

impl ExecutorOptions {

    pub fn mode(&self) -> ExecutorKind {
        self.mode.unwrap_or(ExecutorKind::Optimistic)
    }

    pub fn id_length(&self) -> usize {
        self.id_length.unwrap_or(DEFAULT_ID_LENGTH)
    }

    pub fn sorted_upsert_placeholder(&self) -> bool {
        self.sorted_upsert_placeholder.unwrap_or(false)
    }

    pub fn with_mode(mut self, mode: ExecutorKind) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = Some(id_length);
        self
    }

    pub fn with_sorted_upsert_placeholder(mut self, enabled: bool) -> Self {
        self.sorted_upsert_placeholder = Some(enabled);
        self
    }
}
