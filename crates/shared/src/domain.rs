use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(EventId);
id_newtype!(RoomId);
id_newtype!(UserId);

impl UserId {
    /// Server part of a fully-qualified user id (`@alice:example.org` -> `example.org`).
    pub fn server_name(&self) -> Option<&str> {
        let (_, server) = self.0.split_once(':')?;
        (!server.is_empty()).then_some(server)
    }
}

/// Three-state federation flag computed from the sender and local server parts.
pub fn is_federated(sender: Option<&UserId>, local_domain: Option<&str>) -> Option<bool> {
    let sender_domain = sender.and_then(UserId::server_name)?;
    let local_domain = local_domain?;
    Some(sender_domain != local_domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_splits_on_first_colon() {
        assert_eq!(
            UserId::from("@alice:example.org").server_name(),
            Some("example.org")
        );
        assert_eq!(
            UserId::from("@bob:matrix.org:8448").server_name(),
            Some("matrix.org:8448")
        );
        assert_eq!(UserId::from("@nobody").server_name(), None);
        assert_eq!(UserId::from("@trailing:").server_name(), None);
    }

    #[test]
    fn federation_is_unknown_when_either_side_is_missing() {
        let remote = UserId::from("@alice:remote.example");
        assert_eq!(is_federated(Some(&remote), Some("home.example")), Some(true));
        assert_eq!(is_federated(Some(&remote), Some("remote.example")), Some(false));
        assert_eq!(is_federated(Some(&remote), None), None);
        assert_eq!(is_federated(None, Some("home.example")), None);
        assert_eq!(
            is_federated(Some(&UserId::from("@local")), Some("home.example")),
            None
        );
    }
}
