//! Rate limit key derivation.

/// Separates the identity from the client address inside a key.
const ADDRESS_SEPARATOR: char = '|';
/// Escapes separator and escape characters occurring in key components.
const ESCAPE: char = '\\';

/// A key that uniquely identifies one quota bucket in the counter store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// The key as stored in the counter store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds counter keys from a caller identity and, optionally, its address.
///
/// Identity and address are escaped before being joined, so the first
/// unescaped `|` is always the separator and no two distinct
/// `(identity, address)` pairs map to the same key.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
    use_client_address: bool,
}

impl KeyBuilder {
    /// Create a key builder for the given namespace prefix.
    pub fn new(namespace: impl Into<String>, use_client_address: bool) -> Self {
        Self {
            namespace: namespace.into(),
            use_client_address,
        }
    }

    /// The namespace prefix of every key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether client addresses split an identity's quota.
    pub fn uses_client_address(&self) -> bool {
        self.use_client_address
    }

    /// Derive the key for an identity and optional client address.
    ///
    /// The address is ignored unless address augmentation is enabled.
    pub fn build(&self, identity: &str, client_address: Option<&str>) -> RateLimitKey {
        let mut key = String::with_capacity(
            self.namespace.len() + identity.len() + client_address.map_or(0, |a| a.len() + 1),
        );
        key.push_str(&self.namespace);
        push_escaped(&mut key, identity);

        if self.use_client_address {
            if let Some(address) = client_address {
                key.push(ADDRESS_SEPARATOR);
                push_escaped(&mut key, address);
            }
        }

        RateLimitKey(key)
    }
}

fn push_escaped(key: &mut String, component: &str) {
    for c in component.chars() {
        if c == ESCAPE || c == ADDRESS_SEPARATOR {
            key.push(ESCAPE);
        }
        key.push(c);
    }
}
