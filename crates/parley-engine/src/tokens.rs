use parley_core::messages::Message;

/// Rough token count for a history: total content bytes divided by four,
/// rounded down. Roles, ids and traces are not counted.
pub fn estimate(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content.len()).sum::<usize>() / 4
}
