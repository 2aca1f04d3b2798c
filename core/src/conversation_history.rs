use std::collections::HashSet;

use crate::models::ResponseItem;

/// Transcript of conversation history that is needed for clients with
/// `disable_response_storage` set, for which previous_response_id is not
/// available, so we must include the transcript with every API call. This
/// must include each `function_call` and its corresponding
/// `function_call_output`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConversationHistory {
    /// The oldest items are at the beginning of the vector.
    items: Vec<ResponseItem>,
}

impl ConversationHistory {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Returns a clone of the contents in the transcript.
    pub(crate) fn contents(&self) -> Vec<ResponseItem> {
        self.items.clone()
    }

    /// `items` is ordered from oldest to newest.
    pub(crate) fn record_items<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = &'a ResponseItem>,
    {
        for item in items {
            if is_api_message(item) {
                self.items.push(item.clone());
            }
        }
    }

    /// Drops `function_call`s that will never get an output because their
    /// turn was cancelled; the API rejects a transcript with dangling calls.
    pub(crate) fn remove_calls(&mut self, call_ids: &HashSet<String>) {
        if call_ids.is_empty() {
            return;
        }
        self.items.retain(|item| match item {
            ResponseItem::FunctionCall { call_id, .. }
            | ResponseItem::FunctionCallOutput { call_id, .. } => !call_ids.contains(call_id),
            ResponseItem::Message { .. } | ResponseItem::Reasoning { .. } | ResponseItem::Other => {
                true
            }
        });
    }
}

/// Anything that is not a system message or "reasoning" message is considered
/// an API message.
fn is_api_message(message: &ResponseItem) -> bool {
    match message {
        ResponseItem::Message { role, .. } => role.as_str() != "system",
        ResponseItem::FunctionCallOutput { .. } | ResponseItem::FunctionCall { .. } => true,
        ResponseItem::Reasoning { .. } | ResponseItem::Other => false,
    }
}
