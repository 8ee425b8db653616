use std::borrow::Cow;

use crate::config::ResultQueues;
use crate::model::ResultCategory;

/// Category → destination queue table.
///
/// Known categories map to configured names. Anything else goes to
/// `<category>_result`.
#[derive(Debug, Clone, Default)]
pub struct QueueRoutes {
    queues: ResultQueues,
}

impl QueueRoutes {
    pub fn new(queues: ResultQueues) -> Self {
        Self { queues }
    }

    pub fn resolve(&self, category: &ResultCategory) -> Cow<'_, str> {
        let q = &self.queues;
        match category {
            ResultCategory::Pron => Cow::Borrowed(&q.pron),
            ResultCategory::Inton => Cow::Borrowed(&q.inton),
            ResultCategory::Llm => Cow::Borrowed(&q.llm),
            ResultCategory::Error => Cow::Borrowed(&q.error),
            ResultCategory::Conversation => Cow::Borrowed(&q.conversation),
            ResultCategory::Other(name) => Cow::Owned(format!("{name}_result")),
        }
    }
}
