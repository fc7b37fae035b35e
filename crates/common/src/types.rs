use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a booked order.
    OrderId
);

uuid_id!(
    /// Unique identifier for one execution of the payment-setup saga.
    SagaId
);

uuid_id!(
    /// Unique identifier for a capacity slot.
    ///
    /// Generated slots use deterministic ids (see `SlotId::derive`) so that
    /// regenerating the same window collides instead of duplicating.
    SlotId
);

uuid_id!(
    /// Unique identifier for a service partner.
    PartnerId
);

uuid_id!(
    /// Unique identifier for an authenticated user.
    UserId
);

/// Namespace for name-based slot ids.
const SLOT_NAMESPACE: Uuid = Uuid::from_u128(0x6c61_756e_6472_792d_736c_6f74_2d6e_7330);

impl SlotId {
    /// Derives a stable slot id from the natural key of a slot.
    pub fn derive(natural_key: &str) -> Self {
        Self(Uuid::new_v5(&SLOT_NAMESPACE, natural_key.as_bytes()))
    }
}
