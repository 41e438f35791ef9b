use core::fmt::{Display, Write as _};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

/// Resolves message codes into text.
pub trait MessageSource: Send + Sync {
    /// Formats the message registered under `code` with `args`, falling back to `default`.
    /// Returns `None` if neither a message nor a default is available.
    fn get_message(&self, code: &str, args: &[&dyn Display], default: Option<&str>) -> Option<String>;
}

/// Replaces `{0}`, `{1}`, ... placeholders with the matching arguments.
/// Placeholders without an argument are left as is.
#[must_use]
pub fn format_message(template: &str, args: &[&dyn Display]) -> String {
    let mut message = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        message.push_str(&rest[..start]);
        rest = &rest[start..];
        let arg = rest[1..]
            .find('}')
            .map(|end| &rest[1..=end])
            .filter(|index| !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit()))
            .and_then(|index| Some((index.len(), args.get(index.parse::<usize>().ok()?)?)));
        match arg {
            Some((len, arg)) => {
                let _ = write!(message, "{arg}");
                rest = &rest[len + 2..];
            }
            None => {
                message.push('{');
                rest = &rest[1..];
            }
        }
    }
    message.push_str(rest);
    message
}

/// Message source backed by an in-memory map of code to template
#[derive(Default)]
pub struct StaticMessageSource {
    messages: RwLock<HashMap<String, String>>,
}

impl StaticMessageSource {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, code: impl Into<String>, template: impl Into<String>) {
        self.messages.write().insert(code.into(), template.into());
    }

    #[inline]
    #[must_use]
    pub fn with_message(self, code: impl Into<String>, template: impl Into<String>) -> Self {
        self.add_message(code, template);
        self
    }
}

impl MessageSource for StaticMessageSource {
    fn get_message(&self, code: &str, args: &[&dyn Display], default: Option<&str>) -> Option<String> {
        let messages = self.messages.read();
        messages
            .get(code)
            .map(String::as_str)
            .or(default)
            .map(|template| format_message(template, args))
    }
}

/// Message source used when none is registered.
/// Delegates to a parent if set, otherwise only formats defaults.
#[derive(Default)]
pub struct DelegatingMessageSource {
    parent: Option<Arc<dyn MessageSource>>,
}

impl DelegatingMessageSource {
    #[inline]
    #[must_use]
    pub fn new(parent: Option<Arc<dyn MessageSource>>) -> Self {
        Self { parent }
    }
}

impl MessageSource for DelegatingMessageSource {
    fn get_message(&self, code: &str, args: &[&dyn Display], default: Option<&str>) -> Option<String> {
        match &self.parent {
            Some(parent) => parent.get_message(code, args, default),
            None => default.map(|template| format_message(template, args)),
        }
    }
}
