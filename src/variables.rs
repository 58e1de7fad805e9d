//! Ordered, layered job variables with `$VAR` expansion.
//!
//! Variables keep their insertion order; when a key is appended twice, the
//! last write shadows the earlier one. Expansion is a single pass, so a value
//! substituted into a template is never expanded again.

use serde::{Deserialize, Serialize};

/// A single key/value variable attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVariable {
    /// Variable name.
    pub key: String,
    /// Variable value.
    pub value: String,
    /// Whether the variable is visible to the user's scripts.
    #[serde(default)]
    pub public: bool,
    /// Whether the value must be masked in the job trace.
    #[serde(default)]
    pub masked: bool,
    /// Whether the value is materialized as a file by executors.
    #[serde(default)]
    pub file: bool,
}

impl JobVariable {
    /// Creates a public variable.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            public: true,
            masked: false,
            file: false,
        }
    }

    /// Marks the variable as masked in the trace.
    #[must_use]
    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    /// Marks the variable as non-public.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.public = false;
        self
    }
}

/// An ordered collection of [`JobVariable`]s with shadowing-by-last-write
/// lookup semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSet {
    entries: Vec<JobVariable>,
}

impl VariableSet {
    /// Creates an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a variable, shadowing earlier entries with the same key.
    pub fn append(&mut self, variable: JobVariable) {
        self.entries.push(variable);
    }

    /// Appends every variable from `iter`, preserving order.
    pub fn append_all<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = JobVariable>,
    {
        self.entries.extend(iter);
    }

    /// Returns the value of the last variable appended under `key`, or the
    /// empty string when the key is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.entries
            .iter()
            .rev()
            .find(|v| v.key == key)
            .map_or("", |v| v.value.as_str())
    }

    /// Returns true when at least one entry carries `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|v| v.key == key)
    }

    /// Returns all entries as `KEY=VALUE` strings in insertion order.
    ///
    /// Duplicate keys are emitted verbatim.
    #[must_use]
    pub fn string_list(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|v| format!("{}={}", v.key, v.value))
            .collect()
    }

    /// Returns `KEY=VALUE` strings with duplicate keys collapsed.
    ///
    /// The first occurrence keeps its position; the value is the last one
    /// appended.
    #[must_use]
    pub fn string_list_deduplicated(&self) -> Vec<String> {
        let mut order: Vec<&str> = Vec::new();
        for v in &self.entries {
            if !order.contains(&v.key.as_str()) {
                order.push(v.key.as_str());
            }
        }
        order
            .into_iter()
            .map(|key| format!("{}={}", key, self.get(key)))
            .collect()
    }

    /// Returns the values of all masked variables, skipping empty ones.
    #[must_use]
    pub fn masked_values(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|v| v.masked && !v.value.is_empty())
            .map(|v| v.value.clone())
            .collect()
    }

    /// Number of entries, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the set holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &JobVariable> {
        self.entries.iter()
    }

    /// Expands `$NAME` and `${NAME}` references in `template` against this
    /// set.
    ///
    /// `$$` produces a literal `$`. Unknown names expand to the empty string.
    /// The pass is not recursive: substituted values are copied verbatim.
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some('{') => {
                    chars.next();
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if closed {
                        out.push_str(self.get(&name));
                    } else {
                        // Unterminated reference stays literal.
                        out.push_str("${");
                        out.push_str(&name);
                    }
                }
                Some(next) if next.is_ascii_alphabetic() || *next == '_' => {
                    let mut name = String::new();
                    while let Some(&inner) = chars.peek() {
                        if inner.is_ascii_alphanumeric() || inner == '_' {
                            name.push(inner);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(self.get(&name));
                }
                _ => out.push('$'),
            }
        }

        out
    }
}

impl From<Vec<JobVariable>> for VariableSet {
    fn from(entries: Vec<JobVariable>) -> Self {
        Self { entries }
    }
}

impl IntoIterator for VariableSet {
    type Item = JobVariable;
    type IntoIter = std::vec::IntoIter<JobVariable>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
