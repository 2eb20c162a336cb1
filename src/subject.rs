use std::fmt::{Display, Formatter};

/// [SubjectKind] says which class of rules a [Subject] is checked against.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SubjectKind {
    /// An API credential carried by the request.
    Token,
    /// The client network address.
    Address,
}

/// [Subject] is the entity a quota is attached to.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Subject {
    pub kind: SubjectKind,
    pub key: String,
}

impl Subject {
    pub fn token<T: ToString>(token: T) -> Self {
        Self {
            kind: SubjectKind::Token,
            key: token.to_string(),
        }
    }

    pub fn address<T: ToString>(address: T) -> Self {
        Self {
            kind: SubjectKind::Address,
            key: address.to_string(),
        }
    }

    /// The key used inside a [crate::store::Store].
    /// Namespaced per class, so a token that looks like an address
    /// never shares a counter with that address.
    pub fn storage_key(&self) -> String {
        match self.kind {
            SubjectKind::Token => format!("token:{}", self.key),
            SubjectKind::Address => format!("ip:{}", self.key),
        }
    }
}

impl Display for Subject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SubjectKind::Token => write!(f, "token {}", self.key),
            SubjectKind::Address => write!(f, "address {}", self.key),
        }
    }
}
