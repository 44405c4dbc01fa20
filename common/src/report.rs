use std::fmt::Write;

/// Snapshot of all input states, paired with the unit identifier.
///
/// Built fresh on each delivery tick and discarded once sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReport {
    pub unit_id: String,
    pub items: Vec<bool>,
}

impl StateReport {
    pub fn new(unit_id: impl Into<String>, items: Vec<bool>) -> Self {
        Self {
            unit_id: unit_id.into(),
            items,
        }
    }

    /// Renders the delivery body.
    ///
    /// The byte layout is a compatibility contract with the reporting
    /// endpoint, including the single space after the `unit_id` value:
    /// `{"unit_id":"abc123", "items":[1,0,1]}`.
    pub fn to_json(&self) -> String {
        let mut body = String::with_capacity(24 + self.unit_id.len() + 2 * self.items.len());
        let _ = write!(body, "{{\"unit_id\":\"{}\", \"items\":[", self.unit_id);
        for (index, pressed) in self.items.iter().enumerate() {
            if index > 0 {
                body.push(',');
            }
            body.push(if *pressed { '1' } else { '0' });
        }
        body.push_str("]}");
        body
    }
}
