//! Message kinds, one enum per receiving role.
//!
//! The numeric codes are part of the wire format and must stay stable.

/// A message kind understood by one peer role.
pub trait MessageKind: Copy + Sized {
    /// Human readable role name used in error messages.
    const ROLE: &'static str;

    fn code(self) -> u32;

    fn from_code(code: u32) -> Option<Self>;
}

macro_rules! message_kinds {
    (
        $(#[$meta:meta])* $name:ident, $role:literal {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $code),+
        }

        impl MessageKind for $name {
            const ROLE: &'static str = $role;

            fn code(self) -> u32 {
                self as u32
            }

            fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

message_kinds! {
    /// Messages handled by a Data Provider.
    ProviderMessage, "data provider" {
        /// Roster of every registered Data Provider.
        DpiInfo = 0,
        /// Roster of every registered Compute Node, in GlobalId order.
        ComputeInfo = 1,
        /// Attestation evidence of a Compute Node.
        Evidence = 2,
        /// PEM public key of a Compute Node.
        PublicKey = 3,
        /// Phenotype names wanted by a Compute Node.
        PhenotypeRequest = 4,
        DataRequest = 5,
        Sync = 6,
        Terminate = 7,
    }
}

message_kinds! {
    /// Messages handled by a Compute Node.
    ComputeMessage, "compute node" {
        GlobalId = 0,
        Register = 1,
        SlotKey = 2,
        PatientCount = 3,
        Covariant = 4,
        YValue = 5,
        Data = 6,
        EndOfData = 7,
        Terminate = 8,
    }
}

message_kinds! {
    /// Messages handled by the Coordination Server.
    CoordinatorMessage, "coordination server" {
        ComputeRegister = 0,
        ProviderRegister = 1,
        Output = 2,
        EndOfOutput = 3,
    }
}
