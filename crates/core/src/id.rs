// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes for jobs, client sessions, and devices.
//!
//! Job ids and client ids are monotonically increasing integers handed out by
//! a process-lifetime counter (never reused, matching the job registry
//! invariant in the data model). Printer ids and port names are opaque
//! strings supplied by the device driver / detector, so they get a thin
//! string newtype instead.

/// Generate an integer-backed newtype id with `Display`, `Serialize` and a
/// matching process-lifetime counter type.
///
/// ```ignore
/// define_int_id! {
///     pub struct JobId(JobIdGen);
/// }
/// ```
#[macro_export]
macro_rules! define_int_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($gen:ident);
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        /// Monotonic generator for [`$name`], never reusing a value within
        /// the process lifetime.
        #[derive(Debug, Default)]
        pub struct $gen(std::sync::atomic::AtomicU64);

        impl $gen {
            pub const fn new() -> Self {
                Self(std::sync::atomic::AtomicU64::new(1))
            }

            /// Allocate the next id.
            pub fn next(&self) -> $name {
                $name(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
            }
        }
    };
}

/// Generate a string-backed newtype id with `Display`, `From<&str>`,
/// `From<String>`, `PartialEq<str>`, and `Borrow<str>` impls.
///
/// ```ignore
/// define_str_id! {
///     pub struct PrinterId;
/// }
/// ```
#[macro_export]
macro_rules! define_str_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

crate::define_int_id! {
    /// Identifies a [`crate::job::Job`]. Allocated by the server core's job
    /// counter; never reused within a process lifetime.
    pub struct JobId(JobIdGen);
}

crate::define_int_id! {
    /// Identifies a connected client session. Allocated by the server core's
    /// client counter, separate from [`JobIdGen`]; never reused within a
    /// process lifetime.
    pub struct ClientId(ClientIdGen);
}

crate::define_str_id! {
    /// The device's hardware UUID, as reported by its profile.
    pub struct PrinterId;
}

crate::define_str_id! {
    /// The serial/USB port a device is attached to (e.g. `/dev/ttyACM0`).
    /// Unique within the device registry: a worker registration with an
    /// already-present port name only replaces the prior entry if it has
    /// already been removed.
    pub struct PortName;
}

#[cfg(test)]
mod tests {
    use super::*;

    define_int_id! {
        pub struct TestId(TestIdGen);
    }

    #[test]
    fn int_id_counter_is_monotonic_and_never_reused() {
        let gen = TestIdGen::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();
        assert!(a.get() < b.get());
        assert!(b.get() < c.get());
    }

    #[test]
    fn str_id_equality_against_str() {
        let id = PrinterId::new("abc-123");
        assert_eq!(id, "abc-123");
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn client_id_gen_is_monotonic_and_never_reused() {
        let gen = ClientIdGen::new();
        let a = gen.next();
        let b = gen.next();
        assert!(a.get() < b.get());
    }
}
