use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context kind reported for non-anonymous users.
pub(crate) const CONTEXT_KIND_USER: &str = "user";
/// Context kind reported for users with the `anonymous` flag set.
pub(crate) const CONTEXT_KIND_ANONYMOUS: &str = "anonymousUser";

/// The built-in attributes that are coerced to strings when a user is serialized into event
/// output. `key` is listed first and is never redacted.
pub(crate) const STRING_ATTRIBUTES: [&str; 9] = [
    "key",
    "secondary",
    "ip",
    "country",
    "email",
    "firstName",
    "lastName",
    "avatar",
    "name",
];

/// A user of the application, as seen by flag evaluation and the event pipeline.
///
/// A user always has a `key`. The remaining built-in attributes and any number of `custom`
/// attributes are optional and may hold any JSON value; the built-in ones are coerced to strings
/// when events are serialized.
///
/// # Examples
/// ```
/// # use flagkit_core::User;
/// let user = User::new("user-key")
///     .with_email("test@example.com")
///     .with_custom("groups", vec!["beta", "qa"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secondary: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anonymous: Option<bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    custom: HashMap<String, Value>,
    /// Attribute names that must be redacted for this user in addition to the globally
    /// configured ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    private_attribute_names: Vec<String>,
}

impl User {
    /// Create a user with the given key and no other attributes.
    pub fn new(key: impl Into<String>) -> User {
        User {
            key: key.into(),
            secondary: None,
            ip: None,
            country: None,
            email: None,
            first_name: None,
            last_name: None,
            avatar: None,
            name: None,
            anonymous: None,
            custom: HashMap::new(),
            private_attribute_names: Vec::new(),
        }
    }

    /// The user's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the user was marked anonymous.
    pub fn anonymous(&self) -> bool {
        self.anonymous == Some(true)
    }

    /// The raw anonymous flag, distinguishing "unset" from "false" for serialization.
    pub(crate) fn anonymous_flag(&self) -> Option<bool> {
        self.anonymous
    }

    pub(crate) fn context_kind(&self) -> &'static str {
        if self.anonymous() {
            CONTEXT_KIND_ANONYMOUS
        } else {
            CONTEXT_KIND_USER
        }
    }

    pub(crate) fn secondary(&self) -> Option<&str> {
        self.secondary.as_ref().and_then(Value::as_str)
    }

    pub(crate) fn private_attribute_names(&self) -> &[String] {
        &self.private_attribute_names
    }

    /// Look up an attribute by name, as used in clause matching and bucketing.
    ///
    /// `key` and `anonymous` resolve to the corresponding fields; other names resolve to the
    /// built-in attribute of that name, falling back to `custom`.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "key" => Some(Value::String(self.key.clone())),
            "secondary" => self.secondary.clone(),
            "ip" => self.ip.clone(),
            "country" => self.country.clone(),
            "email" => self.email.clone(),
            "firstName" => self.first_name.clone(),
            "lastName" => self.last_name.clone(),
            "avatar" => self.avatar.clone(),
            "name" => self.name.clone(),
            "anonymous" => self.anonymous.map(Value::Bool),
            _ => self.custom.get(name).cloned(),
        }
    }

    pub(crate) fn custom_attributes(&self) -> &HashMap<String, Value> {
        &self.custom
    }

    /// Set the secondary key, which participates in bucketing.
    pub fn with_secondary(mut self, value: impl Into<Value>) -> User {
        self.secondary = Some(value.into());
        self
    }

    /// Set the IP address attribute.
    pub fn with_ip(mut self, value: impl Into<Value>) -> User {
        self.ip = Some(value.into());
        self
    }

    /// Set the country attribute.
    pub fn with_country(mut self, value: impl Into<Value>) -> User {
        self.country = Some(value.into());
        self
    }

    /// Set the email attribute.
    pub fn with_email(mut self, value: impl Into<Value>) -> User {
        self.email = Some(value.into());
        self
    }

    /// Set the first-name attribute.
    pub fn with_first_name(mut self, value: impl Into<Value>) -> User {
        self.first_name = Some(value.into());
        self
    }

    /// Set the last-name attribute.
    pub fn with_last_name(mut self, value: impl Into<Value>) -> User {
        self.last_name = Some(value.into());
        self
    }

    /// Set the avatar attribute.
    pub fn with_avatar(mut self, value: impl Into<Value>) -> User {
        self.avatar = Some(value.into());
        self
    }

    /// Set the full-name attribute.
    pub fn with_name(mut self, value: impl Into<Value>) -> User {
        self.name = Some(value.into());
        self
    }

    /// Mark the user as anonymous. Anonymous users are reported with context kind
    /// `"anonymousUser"` in alias and feature events.
    pub fn with_anonymous(mut self, anonymous: bool) -> User {
        self.anonymous = Some(anonymous);
        self
    }

    /// Set a custom attribute.
    pub fn with_custom(mut self, name: impl Into<String>, value: impl Into<Value>) -> User {
        self.custom.insert(name.into(), value.into());
        self
    }

    /// Mark an attribute as private for this user. Private attributes are removed from event
    /// output and listed under `privateAttrs`.
    pub fn with_private_attribute(mut self, name: impl Into<String>) -> User {
        self.private_attribute_names.push(name.into());
        self
    }
}
