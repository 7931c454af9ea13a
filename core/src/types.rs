//! Shared primitive types used across the entire engine.

use crate::error::DuesError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Money in minor currency units (100.00 is stored as 10000).
pub type Amount = i64;

/// A stable, unique identifier for a member or a house.
pub type EntityId = String;

pub type ChurchId = String;
pub type ObligationId = String;
pub type DueId = String;
pub type TransactionId = String;

/// Declares a fieldless enum that round-trips through a fixed lowercase
/// text form (serde, `Display`, `FromStr` and the store all share it).
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DuesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DuesError::InvalidField {
                        field: stringify!($name),
                        reason: format!("unknown value '{other}'"),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// The two kinds of entity that can owe, contribute, and hold a wallet.
    EntityKind {
        Member => "Member",
        House  => "House",
    }
}

text_enum! {
    ObligationKind {
        Campaign   => "campaign",
        Collection => "collection",
    }
}

text_enum! {
    /// `Fixed` pushes the amount to every target on creation.
    /// `Variable` lets contributors choose; non-contributors are backfilled.
    AmountMode {
        Fixed    => "fixed",
        Variable => "variable",
    }
}

text_enum! {
    TargetType {
        PerMember => "per_member",
        PerHouse  => "per_house",
        Flexible  => "flexible",
    }
}

text_enum! {
    TargetScope {
        All      => "all",
        Specific => "specific",
    }
}

text_enum! {
    /// How a recurring collection prices the dues of its non-contributors.
    #[derive(Default)]
    DueAmountPolicy {
        #[default]
        Static         => "static",
        DerivedAverage => "derived_average",
    }
}

text_enum! {
    PaymentMethod {
        Cash         => "cash",
        BankTransfer => "bank_transfer",
        Upi          => "upi",
        Cheque       => "cheque",
        Other        => "other",
    }
}

text_enum! {
    TransactionKind {
        Contribution => "contribution",
        DuePayment   => "due_payment",
    }
}

/// Polymorphic owner of a due, wallet, or contribution.
/// All lookups branch on `kind`; ids are never resolved dynamically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn member(id: impl Into<EntityId>) -> Self {
        Self { kind: EntityKind::Member, id: id.into() }
    }

    pub fn house(id: impl Into<EntityId>) -> Self {
        Self { kind: EntityKind::House, id: id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_parse_their_own_text() {
        assert_eq!("per_house".parse::<TargetType>().unwrap(), TargetType::PerHouse);
        assert_eq!("House".parse::<EntityKind>().unwrap(), EntityKind::House);
        assert_eq!(DueAmountPolicy::DerivedAverage.to_string(), "derived_average");
    }

    #[test]
    fn due_amount_policy_defaults_to_static() {
        assert_eq!(DueAmountPolicy::default(), DueAmountPolicy::Static);
    }

    #[test]
    fn unknown_text_is_a_validation_error() {
        let err = "weekly".parse::<ObligationKind>().unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Validation);
    }

    #[test]
    fn entity_ref_serializes_as_tagged_pair() {
        let json = serde_json::to_string(&EntityRef::member("m-1")).unwrap();
        assert_eq!(json, r#"{"kind":"Member","id":"m-1"}"#);
    }
}
