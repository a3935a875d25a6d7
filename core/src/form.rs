//! Bridge between `ApiResult` and whatever form abstraction the host uses.

use std::collections::{BTreeMap, BTreeSet};

/// A form that can receive error messages.
pub trait FormBinder {
    /// Whether the form has a field with this name.
    fn has_field(&self, name: &str) -> bool;

    /// Attach `message` to the named field.
    fn add_field_error(&mut self, name: &str, message: &str);

    /// Attach `message` to the form itself.
    fn add_form_error(&mut self, message: &str);
}

/// Plain collector of form errors, for hosts without a form framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeSet<String>,
    form_errors: Vec<String>,
    field_errors: BTreeMap<String, Vec<String>>,
}

impl FormErrors {
    /// A collector for a form declaring the given fields.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn form_errors(&self) -> &[String] {
        &self.form_errors
    }

    pub fn field_errors(&self, name: &str) -> &[String] {
        self.field_errors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }
}

impl FormBinder for FormErrors {
    fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    fn add_field_error(&mut self, name: &str, message: &str) {
        self.field_errors
            .entry(name.to_string())
            .or_default()
            .push(message.to_string());
    }

    fn add_form_error(&mut self, message: &str) {
        self.form_errors.push(message.to_string());
    }
}
